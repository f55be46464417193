use crate::domain::LoanId;
use crate::error::{LedgerResult, WorkflowError};
use tracing::error;

/// Collapses ledger failures into [`WorkflowError::LedgerIntegration`].
///
/// The downstream cause is logged here and dropped from the returned error so
/// ledger internals never reach the caller.
pub(crate) trait LedgerResultExt<T> {
    fn integration(self, operation: &'static str, loan_id: LoanId) -> Result<T, WorkflowError>;

    /// Same as [`integration`](Self::integration) for calls not tied to one loan.
    fn batch_integration(self, operation: &'static str) -> Result<T, WorkflowError>;
}

impl<T> LedgerResultExt<T> for LedgerResult<T> {
    fn integration(self, operation: &'static str, loan_id: LoanId) -> Result<T, WorkflowError> {
        self.map_err(|err| {
            error!(loan_id, operation, error = %err, "ledger operation failed");
            WorkflowError::LedgerIntegration { operation }
        })
    }

    fn batch_integration(self, operation: &'static str) -> Result<T, WorkflowError> {
        self.map_err(|err| {
            error!(operation, error = %err, "ledger operation failed");
            WorkflowError::LedgerIntegration { operation }
        })
    }
}
