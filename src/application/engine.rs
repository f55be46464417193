use super::commands::{
    ApproveCommand, ChainBuild, ReassignCommand, RejectCommand, SkipReason, UndoCommand,
    WorkflowOutcome,
};
use super::integration::LedgerResultExt;
use super::locks::LoanLocks;
use super::settings::WorkflowSettings;
use super::settlement::{complete_settlement, prepare_settlement, revert_settlement};
use crate::domain::balancer::pick_approver;
use crate::domain::loan::{LoanSnapshot, LoanStatus};
use crate::domain::policy::build_chain;
use crate::domain::ports::{
    AuthorityDirectoryBox, ChainStoreBox, LedgerGatewayBox, LoanRepositoryBox,
};
use crate::domain::step::{ApprovalStep, StepBatch, StepDraft, StepHistory, StepStatus};
use crate::domain::{LoanId, StepId};
use crate::error::{LedgerError, Result, WorkflowError};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

/// Drives loans through their approval chains.
///
/// Every operation runs as one unit of work: it holds the loan's lock,
/// checks its preconditions before touching the ledger, invokes each ledger
/// side effect at most once and commits all step and history changes in a
/// single batch after the side effects succeeded. A failed ledger call leaves
/// the chain exactly as it was.
pub struct WorkflowEngine {
    store: ChainStoreBox,
    ledger: LedgerGatewayBox,
    loans: LoanRepositoryBox,
    directory: AuthorityDirectoryBox,
    settings: WorkflowSettings,
    locks: LoanLocks,
}

/// The lowest queued step ranked above `rank`.
fn next_queued(steps: &[ApprovalStep], rank: u32) -> Option<&ApprovalStep> {
    steps
        .iter()
        .filter(|step| step.rank > rank && step.status == StepStatus::Queue)
        .min_by_key(|step| step.rank)
}

/// The highest approved step ranked below `rank`.
fn previous_approved(steps: &[ApprovalStep], rank: u32) -> Option<&ApprovalStep> {
    steps
        .iter()
        .filter(|step| step.rank < rank && step.status == StepStatus::Approved)
        .max_by_key(|step| step.rank)
}

impl WorkflowEngine {
    /// Creates a new `WorkflowEngine`.
    ///
    /// # Arguments
    ///
    /// * `store` - Persistence for approval steps and history.
    /// * `ledger` - Side-effect gateway into the loan and savings ledger.
    /// * `loans` - Loan reads and lien bookkeeping.
    /// * `directory` - Chain templates and approvers per authority role.
    /// * `settings` - Rounding and payment defaults.
    pub fn new(
        store: ChainStoreBox,
        ledger: LedgerGatewayBox,
        loans: LoanRepositoryBox,
        directory: AuthorityDirectoryBox,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            store,
            ledger,
            loans,
            directory,
            settings,
            locks: LoanLocks::new(),
        }
    }

    async fn load_loan(&self, loan_id: LoanId) -> Result<LoanSnapshot> {
        self.loans
            .find_loan(loan_id)
            .await
            .integration("load loan", loan_id)?
            .ok_or(WorkflowError::LoanNotFound(loan_id))
    }

    /// Loads `step_id` and checks that it is the active step of `loan_id`.
    async fn pending_step(&self, loan_id: LoanId, step_id: StepId) -> Result<ApprovalStep> {
        let step = self
            .store
            .find_by_id(step_id)
            .await?
            .ok_or(WorkflowError::StepNotFound(step_id))?;

        if step.loan_id != loan_id {
            return Err(WorkflowError::InvalidApprovalState(format!(
                "step {} does not belong to loan {}",
                step_id, loan_id
            )));
        }
        if !step.is_pending() {
            return Err(WorkflowError::InvalidApprovalState(format!(
                "step {} is {}, only a PENDING step can be acted on",
                step_id, step.status
            )));
        }
        Ok(step)
    }

    async fn append_note(&self, loan_id: LoanId, note: &str) -> Result<()> {
        if note.trim().is_empty() {
            return Ok(());
        }
        self.ledger
            .append_note(loan_id, note)
            .await
            .integration("append note", loan_id)
    }

    /// Approves the active step of a loan.
    ///
    /// Approving rank 0 submits the loan for approval. The lowest queued rank
    /// above the approved one becomes active; when none is left the loan's
    /// upfront charges are settled and the loan is disbursed.
    ///
    /// The note goes to the ledger first. Ledger steps an earlier failed
    /// attempt already completed are not repeated, so a failed approve can be
    /// retried until it succeeds.
    pub async fn approve(&self, cmd: ApproveCommand) -> Result<WorkflowOutcome> {
        let _guard = self.locks.acquire(cmd.loan_id).await;
        let step = self.pending_step(cmd.loan_id, cmd.step_id).await?;
        let loan = self.load_loan(cmd.loan_id).await?;
        let steps = self.store.find_by_loan_id(loan.id).await?;

        let now = Utc::now();
        let disbursement_date = cmd
            .disbursement_date
            .or(loan.expected_disbursement_date)
            .unwrap_or_else(|| now.date_naive());
        let mut batch = StepBatch::default();
        let mut outcome = WorkflowOutcome::new(loan.id, Some(step.id));

        self.append_note(loan.id, &cmd.note).await?;

        if step.rank == 0 {
            if matches!(loan.status, LoanStatus::Approved | LoanStatus::Active) {
                info!(loan_id = loan.id, status = ?loan.status, "loan already submitted, skipping submission");
            } else {
                self.ledger
                    .submit_loan_for_approval(loan.id, loan.principal, disbursement_date, &cmd.note)
                    .await
                    .integration("submit loan for approval", loan.id)?;
                outcome.change("submittedForApproval", true);
            }
        }

        match next_queued(&steps, step.rank) {
            Some(next) => {
                batch.transition(next, StepStatus::Pending, now);
                outcome.change("nextStepId", next.id);
                outcome.change("nextApproverId", next.assigned_approver_id);
            }
            None if loan.status == LoanStatus::Active => {
                warn!(loan_id = loan.id, "loan already disbursed, completing final approval step");
            }
            None => {
                self.disburse(&loan, &cmd, disbursement_date, &mut outcome).await?;
            }
        }

        batch.transition(&step, StepStatus::Approved, now);
        outcome.change("status", StepStatus::Approved.as_str());

        self.store.commit(batch).await?;
        info!(loan_id = loan.id, step_id = step.id, rank = step.rank, "approval step approved");
        Ok(outcome)
    }

    /// Settles upfront charges and disburses the loan.
    ///
    /// A failed disbursal releases the hold placed for it. Once the loan is
    /// disbursed, lien bookkeeping that does not go through is reported as
    /// `settlementIncomplete` instead of failing the approval.
    async fn disburse(
        &self,
        loan: &LoanSnapshot,
        cmd: &ApproveCommand,
        disbursement_date: NaiveDate,
        outcome: &mut WorkflowOutcome,
    ) -> Result<()> {
        let mut settlement = prepare_settlement(
            &*self.ledger,
            &*self.loans,
            loan,
            cmd.payment_type_id,
            &self.settings,
        )
        .await?;

        if let Err(err) = self
            .ledger
            .disburse_loan(
                loan.id,
                disbursement_date,
                loan.principal,
                cmd.payment_type_id,
                &cmd.note,
            )
            .await
            .integration("disburse loan", loan.id)
        {
            revert_settlement(&*self.ledger, loan.id, &settlement).await;
            return Err(err);
        }
        outcome.change("disbursed", true);
        outcome.change("disbursementDate", disbursement_date.to_string());

        let incomplete = complete_settlement(&*self.ledger, &*self.loans, loan, &mut settlement).await;
        if let Some(account_id) = settlement.account_id {
            outcome.change("savingsAccountId", account_id);
        }
        if settlement.fees_withdrawn > Decimal::ZERO {
            outcome.change("feesWithdrawn", settlement.fees_withdrawn.to_string());
            outcome.change("withdrawalTransactionId", settlement.withdrawal_transaction_id);
        }
        if settlement.amount_held > Decimal::ZERO {
            outcome.change("amountHeld", settlement.amount_held.to_string());
            outcome.change("lienTransactionId", settlement.lien_transaction_id);
        }
        if let Some(released) = settlement.released_transaction_id {
            outcome.change("releasedTransactionId", released);
        }
        if !incomplete.is_empty() {
            warn!(loan_id = loan.id, operations = ?incomplete, "loan disbursed with incomplete lien bookkeeping");
            outcome.change("settlementIncomplete", incomplete);
        }
        Ok(())
    }

    /// Rejects the loan at its active step and releases any lien it holds.
    ///
    /// A loan the ledger already shows as rejected is not rejected again, so
    /// a reject that failed while releasing the lien can be retried.
    pub async fn reject(&self, cmd: RejectCommand) -> Result<WorkflowOutcome> {
        let _guard = self.locks.acquire(cmd.loan_id).await;
        let step = self.pending_step(cmd.loan_id, cmd.step_id).await?;
        let loan = self.load_loan(cmd.loan_id).await?;

        let now = Utc::now();
        let mut batch = StepBatch::default();
        let mut outcome = WorkflowOutcome::new(loan.id, Some(step.id));

        self.append_note(loan.id, &cmd.note).await?;

        if loan.status == LoanStatus::Rejected {
            info!(loan_id = loan.id, "loan already rejected, skipping rejection");
        } else {
            // The ledger only rejects loans still awaiting approval.
            if loan.status != LoanStatus::SubmittedAndPendingApproval {
                warn!(
                    loan_id = loan.id,
                    from = ?loan.status,
                    "forcing loan back to submitted-and-pending-approval before rejection"
                );
                self.loans
                    .force_status(loan.id, LoanStatus::SubmittedAndPendingApproval)
                    .await
                    .integration("repair loan status", loan.id)?;
                outcome.change("statusRepaired", true);
            }
            self.ledger
                .reject_loan(loan.id, now.date_naive(), &cmd.note)
                .await
                .integration("reject loan", loan.id)?;
        }

        if let Some(lien) = loan.lien_transaction_id {
            let account_id = self
                .ledger
                .find_loan_linked_savings_account(loan.id)
                .await
                .integration("find linked savings account", loan.id)?;
            match self.ledger.release_amount(account_id, lien).await {
                Err(LedgerError::NotFound(_)) => {
                    debug!(loan_id = loan.id, transaction_id = lien, "lien already released");
                }
                released => released.integration("release lien", loan.id)?,
            }
            self.loans
                .set_lien_transaction(loan.id, None)
                .await
                .integration("record lien", loan.id)?;
            outcome.change("releasedTransactionId", lien);
        }

        batch.transition(&step, StepStatus::Rejected, now);
        outcome.change("status", StepStatus::Rejected.as_str());

        self.store.commit(batch).await?;
        info!(loan_id = loan.id, step_id = step.id, rank = step.rank, "approval step rejected");
        Ok(outcome)
    }

    /// Sends the loan back to an earlier approved step.
    ///
    /// The target is `undo_to_step_id` when given, otherwise the nearest lower
    /// approved rank. The target becomes active again and the current step
    /// returns to the queue. Rank 0 cannot be undone.
    pub async fn undo(&self, cmd: UndoCommand) -> Result<WorkflowOutcome> {
        let _guard = self.locks.acquire(cmd.loan_id).await;
        let step = self.pending_step(cmd.loan_id, cmd.step_id).await?;
        if step.rank == 0 {
            return Err(WorkflowError::UndoNotAllowed(step.id));
        }

        let steps = self.store.find_by_loan_id(cmd.loan_id).await?;
        let target = match cmd.undo_to_step_id {
            Some(target_id) => {
                let Some(target) = steps.iter().find(|s| s.id == target_id) else {
                    return Err(match self.store.find_by_id(target_id).await? {
                        Some(_) => WorkflowError::InvalidApprovalState(format!(
                            "undo target {} does not belong to loan {}",
                            target_id, cmd.loan_id
                        )),
                        None => WorkflowError::StepNotFound(target_id),
                    });
                };
                if target.status != StepStatus::Approved {
                    return Err(WorkflowError::InvalidApprovalState(format!(
                        "undo target {} is {}, expected APPROVED",
                        target_id, target.status
                    )));
                }
                if target.rank >= step.rank {
                    return Err(WorkflowError::InvalidApprovalState(format!(
                        "undo target {} has rank {}, expected a rank below {}",
                        target_id, target.rank, step.rank
                    )));
                }
                target
            }
            None => previous_approved(&steps, step.rank)
                .ok_or(WorkflowError::UndoNotAllowed(step.id))?,
        };

        let loan = self.load_loan(cmd.loan_id).await?;
        let now = Utc::now();
        let mut batch = StepBatch::default();
        let mut outcome = WorkflowOutcome::new(loan.id, Some(step.id));

        self.append_note(loan.id, &cmd.note).await?;
        if loan.status == LoanStatus::Approved {
            self.ledger
                .undo_loan_approval(loan.id, &cmd.note)
                .await
                .integration("undo loan approval", loan.id)?;
            outcome.change("approvalUndone", true);
        }

        batch.transition(target, StepStatus::Pending, now);
        batch.transition(&step, StepStatus::Queue, now);
        outcome.change("undoToStepId", target.id);
        outcome.change("status", StepStatus::Queue.as_str());

        self.store.commit(batch).await?;
        info!(
            loan_id = loan.id,
            step_id = step.id,
            target_step_id = target.id,
            "approval step undone"
        );
        Ok(outcome)
    }

    /// Hands the active step to another approver.
    ///
    /// The step keeps its `PENDING` status; the reassignment is only visible
    /// as a `REASSIGNED` history row. Reassigning to the current assignee does
    /// nothing.
    pub async fn reassign(&self, cmd: ReassignCommand) -> Result<WorkflowOutcome> {
        let _guard = self.locks.acquire(cmd.loan_id).await;
        let step = self.pending_step(cmd.loan_id, cmd.step_id).await?;
        let mut outcome = WorkflowOutcome::new(cmd.loan_id, Some(step.id));

        if step.assigned_approver_id == Some(cmd.new_approver_id) {
            return Ok(outcome);
        }

        self.directory
            .find_approver(cmd.new_approver_id)
            .await?
            .filter(|approver| approver.active)
            .ok_or(WorkflowError::ApproverNotFound(cmd.new_approver_id))?;

        let previous = step
            .assigned_approver_id
            .map_or_else(|| "unassigned".to_string(), |id| id.to_string());
        let mut text = format!(
            "Approval step {} reassigned from {} to {}",
            step.rank, previous, cmd.new_approver_id
        );
        if !cmd.note.trim().is_empty() {
            text = format!("{}: {}", text, cmd.note.trim());
        }
        self.append_note(cmd.loan_id, &text).await?;

        let now = Utc::now();
        let mut updated = step.clone();
        updated.assigned_approver_id = Some(cmd.new_approver_id);
        updated.modified_at = now;

        let mut batch = StepBatch::default();
        batch.stage(updated);
        batch.record(step.id, StepStatus::Reassigned, now);
        outcome.change("previousApproverId", step.assigned_approver_id);
        outcome.change("assignedApproverId", cmd.new_approver_id);

        self.store.commit(batch).await?;
        info!(
            loan_id = cmd.loan_id,
            step_id = step.id,
            approver_id = cmd.new_approver_id,
            "approval step reassigned"
        );
        Ok(outcome)
    }

    /// Builds the approval chain of a loan and assigns staff to every rank.
    ///
    /// Loans no configured authority can serve are skipped and logged, never
    /// failed. A rank without an eligible approver stays unassigned; when no
    /// rank at all can be assigned the loan is skipped.
    pub async fn build_and_assign_chain(&self, loan_id: LoanId) -> Result<ChainBuild> {
        let _guard = self.locks.acquire(loan_id).await;
        if !self.store.find_by_loan_id(loan_id).await?.is_empty() {
            return Err(WorkflowError::ChainAlreadyExists(loan_id));
        }
        let loan = self.load_loan(loan_id).await?;

        let Some(template) = self.directory.chain_template(loan.product_id).await? else {
            warn!(loan_id, product_id = loan.product_id, "no approval chain template for product");
            return Ok(ChainBuild::Skipped {
                loan_id,
                reason: SkipReason::NoTemplate,
            });
        };

        let chain = build_chain(loan.principal, template.entries());
        if chain.is_empty() {
            warn!(
                loan_id,
                principal = %loan.principal,
                "no configured authority covers the requested principal, loan is unassignable"
            );
            return Ok(ChainBuild::Skipped {
                loan_id,
                reason: SkipReason::NoCoveringAuthority,
            });
        }

        let mut drafts = Vec::with_capacity(chain.len());
        for link in &chain {
            let candidates = self.directory.active_approvers(link.authority_role_id).await?;
            let ids: Vec<_> = candidates.iter().map(|approver| approver.id).collect();
            let loads = self.store.pending_loads(&ids).await?;

            let assigned_approver_id = match pick_approver(link.authority_role_id, &candidates, &loads) {
                Ok(approver) => Some(approver.id),
                Err(WorkflowError::NoEligibleApprover(role_id)) => {
                    warn!(loan_id, rank = link.rank, role_id, "no eligible approver, rank left unassigned");
                    None
                }
                Err(err) => return Err(err),
            };
            drafts.push(StepDraft {
                loan_id,
                rank: link.rank,
                assigned_approver_id,
            });
        }

        if drafts.iter().all(|draft| draft.assigned_approver_id.is_none()) {
            warn!(loan_id, "no eligible approver for any rank, loan skipped");
            return Ok(ChainBuild::Skipped {
                loan_id,
                reason: SkipReason::NoEligibleApprovers,
            });
        }

        let created = self.store.create_chain(drafts).await?;
        let mut outcome = WorkflowOutcome::new(loan_id, created.first().map(|step| step.id));
        outcome.change(
            "stepIds",
            created.iter().map(|step| step.id).collect::<Vec<_>>(),
        );
        outcome.change(
            "assignedApproverIds",
            created
                .iter()
                .map(|step| step.assigned_approver_id)
                .collect::<Vec<_>>(),
        );

        info!(loan_id, steps = created.len(), "approval chain created");
        Ok(ChainBuild::Created(outcome))
    }

    /// Loans with an active approval schedule that have no chain yet.
    pub async fn loans_awaiting_chain(&self) -> Result<Vec<LoanId>> {
        let candidates = self
            .loans
            .loans_with_active_schedule()
            .await
            .batch_integration("list loans with active approval schedule")?;

        let mut awaiting = Vec::new();
        for loan_id in candidates {
            if self.store.find_by_loan_id(loan_id).await?.is_empty() {
                awaiting.push(loan_id);
            }
        }
        Ok(awaiting)
    }

    pub async fn steps_for_loan(&self, loan_id: LoanId) -> Result<Vec<ApprovalStep>> {
        self.store.find_by_loan_id(loan_id).await
    }

    pub async fn history(&self, step_id: StepId) -> Result<Vec<StepHistory>> {
        self.store.history(step_id).await
    }

    pub async fn all_steps(&self) -> Result<Vec<ApprovalStep>> {
        self.store.all_steps().await
    }
}
