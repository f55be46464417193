use crate::domain::loan::{LoanSnapshot, LoanStatus, UpfrontCharge};
use crate::domain::money::{Amount, Balance};
use crate::domain::ports::{LedgerGateway, LoanRepository};
use crate::domain::{AccountId, ChargeId, LoanId, PaymentTypeId, TransactionId};
use crate::error::{LedgerError, LedgerResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Ledger operations, used to inject failures and to count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    SubmitForApproval,
    Disburse,
    Hold,
    Release,
    Withdraw,
    Reject,
    UndoApproval,
    AppendNote,
    FindAccount,
    ForceStatus,
}

/// A ledger call that went through, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerCall {
    SubmitForApproval {
        loan_id: LoanId,
        approved_amount: Decimal,
        disbursement_date: NaiveDate,
    },
    Disburse {
        loan_id: LoanId,
        amount: Decimal,
        disbursement_date: NaiveDate,
        payment_type_id: Option<PaymentTypeId>,
    },
    Hold {
        account_id: AccountId,
        loan_id: Option<LoanId>,
        amount: Decimal,
        transaction_id: TransactionId,
    },
    Release {
        account_id: AccountId,
        transaction_id: TransactionId,
    },
    Withdraw {
        account_id: AccountId,
        amount: Decimal,
        payment_type_id: PaymentTypeId,
        transaction_id: TransactionId,
    },
    Reject {
        loan_id: LoanId,
    },
    UndoApproval {
        loan_id: LoanId,
    },
    AppendNote {
        loan_id: LoanId,
        text: String,
    },
    ForceStatus {
        loan_id: LoanId,
        status: LoanStatus,
    },
}

impl LedgerCall {
    pub fn op(&self) -> LedgerOp {
        match self {
            LedgerCall::SubmitForApproval { .. } => LedgerOp::SubmitForApproval,
            LedgerCall::Disburse { .. } => LedgerOp::Disburse,
            LedgerCall::Hold { .. } => LedgerOp::Hold,
            LedgerCall::Release { .. } => LedgerOp::Release,
            LedgerCall::Withdraw { .. } => LedgerOp::Withdraw,
            LedgerCall::Reject { .. } => LedgerOp::Reject,
            LedgerCall::UndoApproval { .. } => LedgerOp::UndoApproval,
            LedgerCall::AppendNote { .. } => LedgerOp::AppendNote,
            LedgerCall::ForceStatus { .. } => LedgerOp::ForceStatus,
        }
    }
}

/// A savings account with funds on hold per lien transaction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SavingsAccount {
    pub id: AccountId,
    pub available: Balance,
    pub held: Balance,
    holds: HashMap<TransactionId, Balance>,
}

impl SavingsAccount {
    pub fn new(id: AccountId, available: Balance) -> Self {
        Self {
            id,
            available,
            ..Self::default()
        }
    }

    /// Withdraws funds from available if sufficient
    fn withdraw(&mut self, amount: Balance) -> LedgerResult<()> {
        if self.available >= amount {
            self.available -= amount;
            Ok(())
        } else {
            Err(LedgerError::Rejected(format!(
                "insufficient funds in savings account {}",
                self.id
            )))
        }
    }

    /// Holds funds (moves from available to held)
    fn hold(&mut self, transaction_id: TransactionId, amount: Balance) -> LedgerResult<()> {
        if self.available >= amount {
            self.available -= amount;
            self.held += amount;
            self.holds.insert(transaction_id, amount);
            Ok(())
        } else {
            Err(LedgerError::Rejected(format!(
                "insufficient funds to hold in savings account {}",
                self.id
            )))
        }
    }

    /// Releases a hold (moves from held back to available)
    fn release(&mut self, transaction_id: TransactionId) -> LedgerResult<()> {
        let amount = self.holds.remove(&transaction_id).ok_or_else(|| {
            LedgerError::NotFound(format!(
                "hold transaction {} on savings account {}",
                transaction_id, self.id
            ))
        })?;
        self.held -= amount;
        self.available += amount;
        Ok(())
    }
}

#[derive(Default)]
struct LedgerState {
    loans: BTreeMap<LoanId, LoanSnapshot>,
    charges: HashMap<LoanId, Vec<UpfrontCharge>>,
    linked_accounts: HashMap<LoanId, AccountId>,
    accounts: HashMap<AccountId, SavingsAccount>,
    notes: HashMap<LoanId, Vec<String>>,
    journal: Vec<LedgerCall>,
    failing: HashSet<LedgerOp>,
    next_transaction_id: TransactionId,
}

impl LedgerState {
    fn check(&self, op: LedgerOp) -> LedgerResult<()> {
        if self.failing.contains(&op) {
            Err(LedgerError::Unavailable(format!("{:?} failed", op)))
        } else {
            Ok(())
        }
    }

    fn loan_mut(&mut self, loan_id: LoanId) -> LedgerResult<&mut LoanSnapshot> {
        self.loans
            .get_mut(&loan_id)
            .ok_or_else(|| LedgerError::NotFound(format!("loan {}", loan_id)))
    }

    fn account_mut(&mut self, account_id: AccountId) -> LedgerResult<&mut SavingsAccount> {
        self.accounts
            .get_mut(&account_id)
            .ok_or_else(|| LedgerError::NotFound(format!("savings account {}", account_id)))
    }

    fn transition(&mut self, loan_id: LoanId, from: &[LoanStatus], to: LoanStatus) -> LedgerResult<()> {
        let loan = self.loan_mut(loan_id)?;
        if !from.contains(&loan.status) {
            return Err(LedgerError::Rejected(format!(
                "loan {} is {:?}, cannot move to {:?}",
                loan_id, loan.status, to
            )));
        }
        loan.status = to;
        Ok(())
    }

    fn next_transaction(&mut self) -> TransactionId {
        self.next_transaction_id += 1;
        self.next_transaction_id
    }
}

/// An in-memory loan and savings ledger.
///
/// Implements both [`LedgerGateway`] and [`LoanRepository`] over shared
/// state. Every successful call is journaled and any operation can be made to
/// fail, which is what the workflow tests and the CLI run against.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_loan(&self, loan: LoanSnapshot) {
        let mut state = self.state.write().await;
        state.loans.insert(loan.id, loan);
    }

    pub async fn add_charges(&self, loan_id: LoanId, charges: Vec<UpfrontCharge>) {
        let mut state = self.state.write().await;
        state.charges.entry(loan_id).or_default().extend(charges);
    }

    /// Links a loan to a savings account, opening the account if needed.
    pub async fn link_savings_account(&self, loan_id: LoanId, account_id: AccountId, available: Balance) {
        let mut state = self.state.write().await;
        state
            .accounts
            .entry(account_id)
            .or_insert_with(|| SavingsAccount::new(account_id, available));
        state.linked_accounts.insert(loan_id, account_id);
    }

    /// Places a lien on the loan's linked account outside of the workflow.
    pub async fn place_lien(&self, loan_id: LoanId, amount: Balance) -> LedgerResult<TransactionId> {
        let mut state = self.state.write().await;
        let account_id = *state
            .linked_accounts
            .get(&loan_id)
            .ok_or_else(|| LedgerError::NotFound(format!("savings account linked to loan {}", loan_id)))?;
        let transaction_id = state.next_transaction();
        state.account_mut(account_id)?.hold(transaction_id, amount)?;
        state.loan_mut(loan_id)?.lien_transaction_id = Some(transaction_id);
        Ok(transaction_id)
    }

    /// Sets a loan status directly, without journaling.
    pub async fn set_status(&self, loan_id: LoanId, status: LoanStatus) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        state.loan_mut(loan_id)?.status = status;
        Ok(())
    }

    /// Makes every later call of `op` fail.
    pub async fn fail_on(&self, op: LedgerOp) {
        self.state.write().await.failing.insert(op);
    }

    pub async fn heal(&self, op: LedgerOp) {
        self.state.write().await.failing.remove(&op);
    }

    pub async fn calls(&self) -> Vec<LedgerCall> {
        self.state.read().await.journal.clone()
    }

    pub async fn count(&self, op: LedgerOp) -> usize {
        let state = self.state.read().await;
        state.journal.iter().filter(|call| call.op() == op).count()
    }

    pub async fn loan(&self, loan_id: LoanId) -> Option<LoanSnapshot> {
        self.state.read().await.loans.get(&loan_id).cloned()
    }

    pub async fn account(&self, account_id: AccountId) -> Option<SavingsAccount> {
        self.state.read().await.accounts.get(&account_id).cloned()
    }

    pub async fn charges(&self, loan_id: LoanId) -> Vec<UpfrontCharge> {
        let state = self.state.read().await;
        state.charges.get(&loan_id).cloned().unwrap_or_default()
    }

    pub async fn notes(&self, loan_id: LoanId) -> Vec<String> {
        let state = self.state.read().await;
        state.notes.get(&loan_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    async fn submit_loan_for_approval(
        &self,
        loan_id: LoanId,
        approved_amount: Decimal,
        disbursement_date: NaiveDate,
        _note: &str,
    ) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        state.check(LedgerOp::SubmitForApproval)?;
        state.transition(
            loan_id,
            &[LoanStatus::SubmittedAndPendingApproval],
            LoanStatus::Approved,
        )?;
        state.journal.push(LedgerCall::SubmitForApproval {
            loan_id,
            approved_amount,
            disbursement_date,
        });
        Ok(())
    }

    async fn disburse_loan(
        &self,
        loan_id: LoanId,
        disbursement_date: NaiveDate,
        amount: Decimal,
        payment_type_id: Option<PaymentTypeId>,
        _note: &str,
    ) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        state.check(LedgerOp::Disburse)?;
        state.transition(
            loan_id,
            &[LoanStatus::Approved, LoanStatus::SubmittedAndPendingApproval],
            LoanStatus::Active,
        )?;
        state.journal.push(LedgerCall::Disburse {
            loan_id,
            amount,
            disbursement_date,
            payment_type_id,
        });
        Ok(())
    }

    async fn hold_amount(
        &self,
        amount: Amount,
        loan_id: Option<LoanId>,
        account_id: AccountId,
        _note: &str,
    ) -> LedgerResult<TransactionId> {
        let mut state = self.state.write().await;
        state.check(LedgerOp::Hold)?;
        let transaction_id = state.next_transaction();
        state.account_mut(account_id)?.hold(transaction_id, amount.into())?;
        state.journal.push(LedgerCall::Hold {
            account_id,
            loan_id,
            amount: amount.value(),
            transaction_id,
        });
        Ok(transaction_id)
    }

    async fn release_amount(&self, account_id: AccountId, transaction_id: TransactionId) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        state.check(LedgerOp::Release)?;
        state.account_mut(account_id)?.release(transaction_id)?;
        state.journal.push(LedgerCall::Release {
            account_id,
            transaction_id,
        });
        Ok(())
    }

    async fn withdraw_amount(
        &self,
        amount: Amount,
        account_id: AccountId,
        _note: &str,
        _counterparty_account_number: Option<&str>,
        payment_type_id: PaymentTypeId,
    ) -> LedgerResult<TransactionId> {
        let mut state = self.state.write().await;
        state.check(LedgerOp::Withdraw)?;
        let transaction_id = state.next_transaction();
        state.account_mut(account_id)?.withdraw(amount.into())?;
        state.journal.push(LedgerCall::Withdraw {
            account_id,
            amount: amount.value(),
            payment_type_id,
            transaction_id,
        });
        Ok(transaction_id)
    }

    async fn reject_loan(&self, loan_id: LoanId, _date: NaiveDate, _note: &str) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        state.check(LedgerOp::Reject)?;
        state.transition(
            loan_id,
            &[LoanStatus::SubmittedAndPendingApproval],
            LoanStatus::Rejected,
        )?;
        state.journal.push(LedgerCall::Reject { loan_id });
        Ok(())
    }

    async fn undo_loan_approval(&self, loan_id: LoanId, _note: &str) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        state.check(LedgerOp::UndoApproval)?;
        state.transition(
            loan_id,
            &[LoanStatus::Approved],
            LoanStatus::SubmittedAndPendingApproval,
        )?;
        state.journal.push(LedgerCall::UndoApproval { loan_id });
        Ok(())
    }

    async fn append_note(&self, loan_id: LoanId, text: &str) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        state.check(LedgerOp::AppendNote)?;
        state.loan_mut(loan_id)?;
        state.notes.entry(loan_id).or_default().push(text.to_string());
        state.journal.push(LedgerCall::AppendNote {
            loan_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn find_loan_linked_savings_account(&self, loan_id: LoanId) -> LedgerResult<AccountId> {
        let state = self.state.read().await;
        state.check(LedgerOp::FindAccount)?;
        state
            .linked_accounts
            .get(&loan_id)
            .copied()
            .ok_or_else(|| LedgerError::NotFound(format!("savings account linked to loan {}", loan_id)))
    }
}

#[async_trait]
impl LoanRepository for InMemoryLedger {
    async fn find_loan(&self, loan_id: LoanId) -> LedgerResult<Option<LoanSnapshot>> {
        Ok(self.state.read().await.loans.get(&loan_id).cloned())
    }

    async fn loans_with_active_schedule(&self) -> LedgerResult<Vec<LoanId>> {
        let state = self.state.read().await;
        Ok(state
            .loans
            .values()
            .filter(|loan| loan.approval_schedule_active)
            .map(|loan| loan.id)
            .collect())
    }

    async fn upfront_charges(&self, loan_id: LoanId) -> LedgerResult<Vec<UpfrontCharge>> {
        let state = self.state.read().await;
        Ok(state.charges.get(&loan_id).cloned().unwrap_or_default())
    }

    async fn mark_charges_paid(&self, loan_id: LoanId, charge_ids: &[ChargeId]) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        let charges = state
            .charges
            .get_mut(&loan_id)
            .ok_or_else(|| LedgerError::NotFound(format!("charges of loan {}", loan_id)))?;
        for charge in charges.iter_mut().filter(|c| charge_ids.contains(&c.id)) {
            charge.fully_paid = true;
            charge.amount_outstanding = Decimal::ZERO;
        }
        Ok(())
    }

    async fn set_lien_transaction(
        &self,
        loan_id: LoanId,
        transaction_id: Option<TransactionId>,
    ) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        state.loan_mut(loan_id)?.lien_transaction_id = transaction_id;
        Ok(())
    }

    async fn force_status(&self, loan_id: LoanId, status: LoanStatus) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        state.check(LedgerOp::ForceStatus)?;
        state.loan_mut(loan_id)?.status = status;
        state.journal.push(LedgerCall::ForceStatus { loan_id, status });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn loan(id: LoanId) -> LoanSnapshot {
        LoanSnapshot {
            id,
            product_id: 1,
            principal: dec!(1000),
            status: LoanStatus::SubmittedAndPendingApproval,
            expected_disbursement_date: None,
            lien_transaction_id: None,
            approval_schedule_active: true,
        }
    }

    #[test]
    fn test_savings_account_hold_and_release() {
        let mut account = SavingsAccount::new(1, Balance::new(dec!(100)));
        account.hold(7, Balance::new(dec!(40))).unwrap();
        assert_eq!(account.available, Balance::new(dec!(60)));
        assert_eq!(account.held, Balance::new(dec!(40)));

        account.release(7).unwrap();
        assert_eq!(account.available, Balance::new(dec!(100)));
        assert_eq!(account.held, Balance::ZERO);
        assert!(matches!(account.release(7), Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn test_savings_account_insufficient_funds() {
        let mut account = SavingsAccount::new(1, Balance::new(dec!(10)));
        assert!(matches!(
            account.withdraw(Balance::new(dec!(20))),
            Err(LedgerError::Rejected(_))
        ));
        assert!(matches!(
            account.hold(1, Balance::new(dec!(20))),
            Err(LedgerError::Rejected(_))
        ));
        assert_eq!(account.available, Balance::new(dec!(10)));
    }

    #[tokio::test]
    async fn test_loan_lifecycle_guards() {
        let ledger = InMemoryLedger::new();
        ledger.add_loan(loan(1)).await;
        let date = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();

        assert!(matches!(
            ledger.undo_loan_approval(1, "").await,
            Err(LedgerError::Rejected(_))
        ));
        ledger.submit_loan_for_approval(1, dec!(1000), date, "").await.unwrap();
        assert!(matches!(
            ledger.reject_loan(1, date, "").await,
            Err(LedgerError::Rejected(_))
        ));
        ledger.undo_loan_approval(1, "").await.unwrap();
        ledger.reject_loan(1, date, "").await.unwrap();

        assert_eq!(ledger.loan(1).await.unwrap().status, LoanStatus::Rejected);
        assert_eq!(ledger.count(LedgerOp::SubmitForApproval).await, 1);
        assert_eq!(ledger.count(LedgerOp::Reject).await, 1);
    }

    #[tokio::test]
    async fn test_injected_failure_is_not_journaled() {
        let ledger = InMemoryLedger::new();
        ledger.add_loan(loan(1)).await;
        ledger.fail_on(LedgerOp::AppendNote).await;

        assert!(matches!(
            ledger.append_note(1, "hello").await,
            Err(LedgerError::Unavailable(_))
        ));
        assert!(ledger.calls().await.is_empty());

        ledger.heal(LedgerOp::AppendNote).await;
        ledger.append_note(1, "hello").await.unwrap();
        assert_eq!(ledger.notes(1).await, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_unlinked_loan_has_no_savings_account() {
        let ledger = InMemoryLedger::new();
        ledger.add_loan(loan(1)).await;
        assert!(matches!(
            ledger.find_loan_linked_savings_account(1).await,
            Err(LedgerError::NotFound(_))
        ));

        ledger.link_savings_account(1, 50, Balance::new(dec!(10))).await;
        assert_eq!(ledger.find_loan_linked_savings_account(1).await.unwrap(), 50);
    }
}
