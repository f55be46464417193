use crate::domain::{ApproverId, LoanId, PaymentTypeId, StepId};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApproveCommand {
    pub loan_id: LoanId,
    pub step_id: StepId,
    pub note: String,
    pub disbursement_date: Option<NaiveDate>,
    pub payment_type_id: Option<PaymentTypeId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RejectCommand {
    pub loan_id: LoanId,
    pub step_id: StepId,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UndoCommand {
    pub loan_id: LoanId,
    pub step_id: StepId,
    pub note: String,
    /// Explicit step to return to. Defaults to the nearest lower approved rank.
    pub undo_to_step_id: Option<StepId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReassignCommand {
    pub loan_id: LoanId,
    pub step_id: StepId,
    pub note: String,
    pub new_approver_id: ApproverId,
}

/// Result of a workflow operation, shaped for audit logs and API responses.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutcome {
    pub loan_id: LoanId,
    pub step_id: Option<StepId>,
    pub changes: BTreeMap<String, Value>,
}

impl WorkflowOutcome {
    pub fn new(loan_id: LoanId, step_id: Option<StepId>) -> Self {
        Self {
            loan_id,
            step_id,
            changes: BTreeMap::new(),
        }
    }

    pub fn change(&mut self, field: &str, value: impl Into<Value>) {
        self.changes.insert(field.to_string(), value.into());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The loan's product has no chain template.
    NoTemplate,
    /// No configured authority level covers the requested principal.
    NoCoveringAuthority,
    /// None of the chain's roles has an active approver.
    NoEligibleApprovers,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainBuild {
    Created(WorkflowOutcome),
    /// Left for an operator to fix; the next scan picks the loan up again.
    Skipped { loan_id: LoanId, reason: SkipReason },
}

/// Summary of one chain construction pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub created: Vec<LoanId>,
    pub skipped: Vec<(LoanId, SkipReason)>,
    pub failed: Vec<LoanId>,
}
