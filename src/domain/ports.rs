use super::balancer::Approver;
use super::loan::{LoanSnapshot, LoanStatus, UpfrontCharge};
use super::money::Amount;
use super::step::{ApprovalStep, StepBatch, StepDraft, StepHistory};
use super::template::ApprovalChainTemplate;
use super::{
    AccountId, ApproverId, ChargeId, LoanId, PaymentTypeId, ProductId, RoleId, StepId,
    TransactionId,
};
use crate::error::{LedgerResult, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Persistence for approval steps and their history.
///
/// Holds no business rules. `create_chain` and `commit` must be atomic.
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Inserts one step per draft (rank 0 `Pending`, the rest `Queue`) and one
    /// history row per step with that initial status.
    async fn create_chain(&self, drafts: Vec<StepDraft>) -> Result<Vec<ApprovalStep>>;
    async fn commit(&self, batch: StepBatch) -> Result<()>;
    async fn find_by_id(&self, step_id: StepId) -> Result<Option<ApprovalStep>>;
    /// Steps of a loan in ascending rank order.
    async fn find_by_loan_id(&self, loan_id: LoanId) -> Result<Vec<ApprovalStep>>;
    async fn history(&self, step_id: StepId) -> Result<Vec<StepHistory>>;
    /// PENDING step counts for the given approvers. Approvers without any
    /// pending step are left out of the map.
    async fn pending_loads(&self, approvers: &[ApproverId]) -> Result<HashMap<ApproverId, usize>>;
    async fn all_steps(&self) -> Result<Vec<ApprovalStep>>;
}

/// Commands executed against the loan and savings ledger.
///
/// None of these are assumed idempotent.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn submit_loan_for_approval(
        &self,
        loan_id: LoanId,
        approved_amount: Decimal,
        disbursement_date: NaiveDate,
        note: &str,
    ) -> LedgerResult<()>;

    async fn disburse_loan(
        &self,
        loan_id: LoanId,
        disbursement_date: NaiveDate,
        amount: Decimal,
        payment_type_id: Option<PaymentTypeId>,
        note: &str,
    ) -> LedgerResult<()>;

    async fn hold_amount(
        &self,
        amount: Amount,
        loan_id: Option<LoanId>,
        account_id: AccountId,
        note: &str,
    ) -> LedgerResult<TransactionId>;

    async fn release_amount(
        &self,
        account_id: AccountId,
        transaction_id: TransactionId,
    ) -> LedgerResult<()>;

    async fn withdraw_amount(
        &self,
        amount: Amount,
        account_id: AccountId,
        note: &str,
        counterparty_account_number: Option<&str>,
        payment_type_id: PaymentTypeId,
    ) -> LedgerResult<TransactionId>;

    async fn reject_loan(
        &self,
        loan_id: LoanId,
        date: NaiveDate,
        note: &str,
    ) -> LedgerResult<()>;

    async fn undo_loan_approval(&self, loan_id: LoanId, note: &str) -> LedgerResult<()>;

    async fn append_note(&self, loan_id: LoanId, text: &str) -> LedgerResult<()>;

    /// Fails with [`crate::error::LedgerError::NotFound`] when the loan has no linked account.
    async fn find_loan_linked_savings_account(
        &self,
        loan_id: LoanId,
    ) -> LedgerResult<AccountId>;
}

/// Loan-side reads and bookkeeping the workflow relies on.
#[async_trait]
pub trait LoanRepository: Send + Sync {
    async fn find_loan(&self, loan_id: LoanId) -> LedgerResult<Option<LoanSnapshot>>;
    /// Loans with an active approval schedule, in ascending id order.
    async fn loans_with_active_schedule(&self) -> LedgerResult<Vec<LoanId>>;
    async fn upfront_charges(&self, loan_id: LoanId) -> LedgerResult<Vec<UpfrontCharge>>;
    async fn mark_charges_paid(
        &self,
        loan_id: LoanId,
        charge_ids: &[ChargeId],
    ) -> LedgerResult<()>;
    async fn set_lien_transaction(
        &self,
        loan_id: LoanId,
        transaction_id: Option<TransactionId>,
    ) -> LedgerResult<()>;
    /// Overwrites the loan status without going through a ledger command.
    /// Only used as an explicit compensating action.
    async fn force_status(&self, loan_id: LoanId, status: LoanStatus) -> LedgerResult<()>;
}

/// Authority configuration: chain templates and the staff holding each role.
#[async_trait]
pub trait AuthorityDirectory: Send + Sync {
    async fn chain_template(&self, product_id: ProductId) -> Result<Option<ApprovalChainTemplate>>;
    /// Active approvers holding `role_id`, in enumeration order.
    async fn active_approvers(&self, role_id: RoleId) -> Result<Vec<Approver>>;
    async fn find_approver(&self, approver_id: ApproverId) -> Result<Option<Approver>>;
}

pub type ChainStoreBox = Box<dyn ChainStore>;
pub type LedgerGatewayBox = Box<dyn LedgerGateway>;
pub type LoanRepositoryBox = Box<dyn LoanRepository>;
pub type AuthorityDirectoryBox = Box<dyn AuthorityDirectory>;
