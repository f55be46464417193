use crate::domain::PaymentTypeId;
use crate::domain::money::MONEY_SCALE;
use serde::{Deserialize, Serialize};

/// Tunables of the workflow engine, read from the `settings` block of the
/// setup file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowSettings {
    /// Decimal places every ledger amount is rounded to.
    pub money_scale: u32,
    /// Payment type for upfront fee withdrawals when the approver gives none.
    pub fee_payment_type_id: PaymentTypeId,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            money_scale: MONEY_SCALE,
            fee_payment_type_id: 1,
        }
    }
}
