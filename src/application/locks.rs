use crate::domain::LoanId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes units of work per loan.
///
/// Two operations on the same loan never interleave; operations on different
/// loans run freely. Entries nobody holds are dropped on the next acquire.
#[derive(Default)]
pub struct LoanLocks {
    locks: Mutex<HashMap<LoanId, Arc<AsyncMutex<()>>>>,
}

impl LoanLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the loan is free and returns a guard holding it.
    pub async fn acquire(&self, loan_id: LoanId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|id, lock| *id == loan_id || Arc::strong_count(lock) > 1);
            locks.entry(loan_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
