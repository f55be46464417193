use super::{ChargeId, LoanId, ProductId, TransactionId};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    SubmittedAndPendingApproval,
    Approved,
    Active,
    Rejected,
    Closed,
}

/// What the workflow needs to know about a loan held by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanSnapshot {
    pub id: LoanId,
    pub product_id: ProductId,
    pub principal: Decimal,
    pub status: LoanStatus,
    #[serde(default)]
    pub expected_disbursement_date: Option<NaiveDate>,
    /// Active hold placed on the linked savings account, if any.
    #[serde(default)]
    pub lien_transaction_id: Option<TransactionId>,
    #[serde(default)]
    pub approval_schedule_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeKind {
    /// Collected from the linked savings account at disbursal.
    UpfrontFee,
    /// Held on the linked savings account at disbursal.
    UpfrontHold,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpfrontCharge {
    pub id: ChargeId,
    pub kind: ChargeKind,
    pub amount_outstanding: Decimal,
    #[serde(default)]
    pub fully_paid: bool,
}

impl UpfrontCharge {
    pub fn is_outstanding(&self, kind: ChargeKind) -> bool {
        self.kind == kind && !self.fully_paid && self.amount_outstanding > Decimal::ZERO
    }
}
