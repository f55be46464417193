use crate::application::settings::WorkflowSettings;
use crate::domain::balancer::Approver;
use crate::domain::loan::{LoanSnapshot, UpfrontCharge};
use crate::domain::money::Balance;
use crate::domain::template::{ApprovalChainTemplate, TemplateEntry};
use crate::domain::{AccountId, ProductId};
use crate::error::{Result, WorkflowError};
use crate::infrastructure::in_memory::InMemoryDirectory;
use crate::infrastructure::ledger::InMemoryLedger;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// Authority configuration and ledger contents loaded from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    #[serde(default)]
    pub settings: WorkflowSettings,
    #[serde(default)]
    pub products: Vec<ProductSetup>,
    #[serde(default)]
    pub approvers: Vec<Approver>,
    #[serde(default)]
    pub loans: Vec<LoanSetup>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSetup {
    pub id: ProductId,
    pub template: Vec<TemplateEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanSetup {
    #[serde(flatten)]
    pub loan: LoanSnapshot,
    #[serde(default)]
    pub charges: Vec<UpfrontCharge>,
    #[serde(default)]
    pub savings_account: Option<SavingsSetup>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsSetup {
    pub id: AccountId,
    pub available: Decimal,
    /// Amount already held against the loan before it enters the workflow.
    #[serde(default)]
    pub lien: Option<Decimal>,
}

impl Setup {
    pub fn from_reader<R: Read>(source: R) -> Result<Self> {
        Ok(serde_json::from_reader(source)?)
    }

    /// Loads templates and approvers into the directory and loans into the
    /// ledger.
    pub async fn install(&self, directory: &InMemoryDirectory, ledger: &InMemoryLedger) -> Result<()> {
        for product in &self.products {
            let template = ApprovalChainTemplate::new(product.id, product.template.clone())?;
            directory.add_template(template).await?;
        }
        for approver in &self.approvers {
            directory.add_approver(approver.clone()).await;
        }

        for entry in &self.loans {
            let loan_id = entry.loan.id;
            ledger.add_loan(entry.loan.clone()).await;
            ledger.add_charges(loan_id, entry.charges.clone()).await;

            if let Some(account) = &entry.savings_account {
                ledger
                    .link_savings_account(loan_id, account.id, Balance::new(account.available))
                    .await;
                if let Some(lien) = account.lien {
                    ledger
                        .place_lien(loan_id, Balance::new(lien))
                        .await
                        .map_err(|e| {
                            WorkflowError::ValidationError(format!(
                                "Cannot place lien for loan {}: {}",
                                loan_id, e
                            ))
                        })?;
                }
            }
        }
        Ok(())
    }
}
