use super::money::Threshold;
use super::{ProductId, RoleId};
use crate::error::WorkflowError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One authority level of a product's approval chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateEntry {
    pub rank: u32,
    pub authority_role_id: RoleId,
    #[serde(default)]
    pub max_approval_amount: Threshold,
}

/// The ordered authority levels configured for a loan product.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalChainTemplate {
    product_id: ProductId,
    entries: Vec<TemplateEntry>,
}

impl ApprovalChainTemplate {
    /// Builds a template, checking that ranks run 0, 1, 2, ... in order and
    /// that no limit is negative.
    pub fn new(product_id: ProductId, entries: Vec<TemplateEntry>) -> Result<Self, WorkflowError> {
        for (position, entry) in entries.iter().enumerate() {
            if entry.rank as usize != position {
                return Err(WorkflowError::ValidationError(format!(
                    "Template for product {} has rank {} at position {}; ranks must be contiguous from 0",
                    product_id, entry.rank, position
                )));
            }
            if let Threshold::Limit(limit) = entry.max_approval_amount
                && limit < Decimal::ZERO
            {
                return Err(WorkflowError::ValidationError(format!(
                    "Template for product {} has a negative limit at rank {}",
                    product_id, entry.rank
                )));
            }
        }

        Ok(Self {
            product_id,
            entries,
        })
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn entries(&self) -> &[TemplateEntry] {
        &self.entries
    }
}
