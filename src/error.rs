use crate::domain::{ApproverId, LoanId, RoleId, StepId};
use thiserror::Error;

/// Errors surfaced by the approval workflow.
///
/// Precondition and not-found variants are reported to the caller as-is.
/// Ledger failures are collapsed into [`WorkflowError::LedgerIntegration`]; the
/// downstream cause is logged where it happens and never echoed back.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid approval state: {0}")]
    InvalidApprovalState(String),
    #[error("Step {0} cannot be undone: no approved step to return to")]
    UndoNotAllowed(StepId),
    #[error("Approval step {0} not found")]
    StepNotFound(StepId),
    #[error("Loan {0} not found")]
    LoanNotFound(LoanId),
    #[error("Approver {0} not found or inactive")]
    ApproverNotFound(ApproverId),
    #[error("No eligible approver for authority role {0}")]
    NoEligibleApprover(RoleId),
    #[error("Loan {0} already has an approval chain")]
    ChainAlreadyExists(LoanId),
    #[error("Data integrity issue while executing '{operation}'")]
    LedgerIntegration { operation: &'static str },
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for WorkflowError {
    fn from(err: rocksdb::Error) -> Self {
        WorkflowError::InternalError(Box::new(err))
    }
}

/// Failures reported by the ledger side of the system.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("ledger rejected the operation: {0}")]
    Rejected(String),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
