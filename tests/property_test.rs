//! Property-based tests for chain construction and the approval state machine.
//!
//! Chain filtering is checked against generated templates and principals.
//! The workflow is driven with generated operation sequences, valid and
//! invalid, and the per-loan chain invariants are checked after every step.

mod common;

use common::{Harness, ROLE_A, ROLE_B, ROLE_C, entry, pending_count};
use loan_approval::application::commands::{
    ApproveCommand, ReassignCommand, RejectCommand, UndoCommand,
};
use loan_approval::domain::LoanId;
use loan_approval::domain::money::Threshold;
use loan_approval::domain::policy::build_chain;
use loan_approval::domain::step::StepStatus;
use loan_approval::domain::template::TemplateEntry;
use loan_approval::infrastructure::ledger::LedgerCall;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const LOANS: usize = 6;

/// A threshold that is either open-ended or a whole-unit limit, zero included.
fn threshold_strategy() -> impl Strategy<Value = Option<Decimal>> {
    prop_oneof![
        2 => Just(None),
        3 => (0..100_000u64).prop_map(|limit| Some(Decimal::from(limit))),
    ]
}

/// Templates with contiguous ranks and one role per rank.
fn template_strategy() -> impl Strategy<Value = Vec<TemplateEntry>> {
    prop::collection::vec(threshold_strategy(), 1..6).prop_map(|limits| {
        limits
            .into_iter()
            .enumerate()
            .map(|(rank, limit)| entry(rank as u32, rank as u64 + 1, limit))
            .collect()
    })
}

fn principal_strategy() -> impl Strategy<Value = Decimal> {
    (1..100_000u64).prop_map(Decimal::from)
}

#[derive(Debug, Clone)]
enum Action {
    Approve,
    Undo { explicit_target: bool },
    Reassign { to_spare: bool },
    Reject,
}

/// One workflow command against a loan. `on_active` aims it at the pending
/// step, otherwise it hits the step at `pick` whatever its status.
#[derive(Debug, Clone)]
struct Operation {
    loan: usize,
    pick: usize,
    on_active: bool,
    action: Action,
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        6 => Just(Action::Approve),
        2 => any::<bool>().prop_map(|explicit_target| Action::Undo { explicit_target }),
        1 => any::<bool>().prop_map(|to_spare| Action::Reassign { to_spare }),
        1 => Just(Action::Reject),
    ]
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    (0..LOANS, 0..3usize, prop::bool::weighted(0.8), action_strategy()).prop_map(
        |(loan, pick, on_active, action)| Operation {
            loan,
            pick,
            on_active,
            action,
        },
    )
}

async fn apply(h: &Harness, loan_id: LoanId, operation: &Operation) {
    let steps = h.steps(loan_id).await;
    let picked = &steps[operation.pick % steps.len()];
    let step_id = if operation.on_active {
        steps
            .iter()
            .find(|step| step.status == StepStatus::Pending)
            .map_or(picked.id, |step| step.id)
    } else {
        picked.id
    };

    // Invalid operations fail, only the invariants matter.
    let _ = match operation.action {
        Action::Approve => h
            .engine
            .approve(ApproveCommand {
                loan_id,
                step_id,
                ..ApproveCommand::default()
            })
            .await
            .map(|_| ()),
        Action::Undo { explicit_target } => h
            .engine
            .undo(UndoCommand {
                loan_id,
                step_id,
                note: String::new(),
                undo_to_step_id: explicit_target.then_some(picked.id),
            })
            .await
            .map(|_| ()),
        Action::Reassign { to_spare } => h
            .engine
            .reassign(ReassignCommand {
                loan_id,
                step_id,
                note: String::new(),
                new_approver_id: if to_spare { 101 } else { 100 },
            })
            .await
            .map(|_| ()),
        Action::Reject => h
            .engine
            .reject(RejectCommand {
                loan_id,
                step_id,
                note: String::new(),
            })
            .await
            .map(|_| ()),
    };
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn test_chain_keeps_exactly_the_covering_levels(
        template in template_strategy(),
        principal in principal_strategy(),
    ) {
        let chain = build_chain(principal, &template);
        let covering: Vec<_> = template
            .iter()
            .filter(|entry| entry.max_approval_amount.covers(principal))
            .collect();

        prop_assert_eq!(chain.len(), covering.len());
        for (index, (step, source)) in chain.iter().zip(&covering).enumerate() {
            prop_assert_eq!(step.rank, index as u32);
            prop_assert_eq!(step.template_rank, source.rank);
            prop_assert_eq!(step.authority_role_id, source.authority_role_id);
            if let Threshold::Limit(limit) = source.max_approval_amount
                && limit > Decimal::ZERO
            {
                prop_assert!(limit >= principal);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_operation_sequences_keep_one_active_step(
        large in prop::collection::vec(any::<bool>(), LOANS),
        operations in prop::collection::vec(operation_strategy(), 1..80),
    ) {
        runtime().block_on(async {
            let h = Harness::three_levels().await;
            h.directory
                .add_approver(common::approver(101, &[ROLE_A, ROLE_B, ROLE_C]))
                .await;

            let loans: Vec<LoanId> = (1..=LOANS as LoanId).collect();
            for (&loan_id, &is_large) in loans.iter().zip(&large) {
                let principal = if is_large { dec!(80000) } else { dec!(20000) };
                h.loan_with_chain(loan_id, principal).await;
            }

            for operation in &operations {
                apply(&h, loans[operation.loan], operation).await;

                for &loan_id in &loans {
                    let steps = h.steps(loan_id).await;
                    let pending = pending_count(&steps);
                    let rejected = steps.iter().any(|step| step.status == StepStatus::Rejected);
                    let finished = steps.iter().all(|step| step.status == StepStatus::Approved);

                    prop_assert!(pending <= 1, "loan {} has {} pending steps", loan_id, pending);
                    if rejected {
                        prop_assert_eq!(pending, 0);
                    }
                    if pending == 0 {
                        prop_assert!(rejected || finished, "loan {} stalled: {:?}", loan_id, steps);
                    }
                    // Every rank below the active one has been approved.
                    if let Some(active) = steps.iter().find(|step| step.status == StepStatus::Pending) {
                        prop_assert!(
                            steps
                                .iter()
                                .filter(|step| step.rank < active.rank)
                                .all(|step| step.status == StepStatus::Approved),
                            "loan {} skipped a rank: {:?}",
                            loan_id,
                            steps
                        );
                    }
                }
            }

            let calls = h.ledger.calls().await;
            for &loan_id in &loans {
                let disbursals = calls
                    .iter()
                    .filter(|call| matches!(call, LedgerCall::Disburse { loan_id: id, .. } if *id == loan_id))
                    .count();
                prop_assert!(disbursals <= 1);
                if disbursals == 1 {
                    prop_assert!(h.statuses(loan_id).await.iter().all(|status| *status == StepStatus::Approved));
                }
            }
            Ok(())
        })?;
    }
}
