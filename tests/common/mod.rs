#![allow(dead_code)]

use loan_approval::application::commands::{ApproveCommand, ChainBuild};
use loan_approval::application::engine::WorkflowEngine;
use loan_approval::application::settings::WorkflowSettings;
use loan_approval::domain::balancer::Approver;
use loan_approval::domain::loan::{LoanSnapshot, LoanStatus};
use loan_approval::domain::money::{Balance, Threshold};
use loan_approval::domain::ports::ChainStore;
use loan_approval::domain::step::{ApprovalStep, StepStatus};
use loan_approval::domain::template::{ApprovalChainTemplate, TemplateEntry};
use loan_approval::domain::{ApproverId, LoanId, ProductId, RoleId};
use loan_approval::infrastructure::in_memory::{InMemoryChainStore, InMemoryDirectory};
use loan_approval::infrastructure::ledger::InMemoryLedger;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub const PRODUCT: ProductId = 1;
pub const ROLE_A: RoleId = 10;
pub const ROLE_B: RoleId = 20;
pub const ROLE_C: RoleId = 30;

/// Engine wired to in-memory adapters, with handles kept for inspection.
pub struct Harness {
    pub engine: Arc<WorkflowEngine>,
    pub store: InMemoryChainStore,
    pub ledger: InMemoryLedger,
    pub directory: InMemoryDirectory,
}

impl Harness {
    pub async fn new() -> Self {
        let store = InMemoryChainStore::new();
        let ledger = InMemoryLedger::new();
        let directory = InMemoryDirectory::new();
        let engine = WorkflowEngine::new(
            Box::new(store.clone()),
            Box::new(ledger.clone()),
            Box::new(ledger.clone()),
            Box::new(directory.clone()),
            WorkflowSettings::default(),
        );
        Self {
            engine: Arc::new(engine),
            store,
            ledger,
            directory,
        }
    }

    /// Harness with the three-level template `[(0, A, unbounded), (1, B, 50000), (2, C, unbounded)]`
    /// and one active approver per role (ids 100, 200, 300).
    pub async fn three_levels() -> Self {
        let harness = Self::new().await;
        harness
            .directory
            .add_template(three_level_template())
            .await
            .unwrap();
        for (id, role) in [(100, ROLE_A), (200, ROLE_B), (300, ROLE_C)] {
            harness.directory.add_approver(approver(id, &[role])).await;
        }
        harness
    }

    pub async fn add_loan(&self, id: LoanId, principal: Decimal) {
        self.ledger.add_loan(loan(id, principal)).await;
    }

    /// Adds a loan and builds its chain, returning the created steps.
    pub async fn loan_with_chain(&self, id: LoanId, principal: Decimal) -> Vec<ApprovalStep> {
        self.add_loan(id, principal).await;
        let build = self.engine.build_and_assign_chain(id).await.unwrap();
        assert!(matches!(build, ChainBuild::Created(_)), "chain not created: {:?}", build);
        self.steps(id).await
    }

    pub async fn steps(&self, loan_id: LoanId) -> Vec<ApprovalStep> {
        self.store.find_by_loan_id(loan_id).await.unwrap()
    }

    pub async fn statuses(&self, loan_id: LoanId) -> Vec<StepStatus> {
        self.steps(loan_id).await.iter().map(|step| step.status).collect()
    }

    pub async fn approve(&self, loan_id: LoanId, step: &ApprovalStep) {
        self.engine
            .approve(ApproveCommand {
                loan_id,
                step_id: step.id,
                ..ApproveCommand::default()
            })
            .await
            .unwrap();
    }

    pub async fn loan_status(&self, loan_id: LoanId) -> LoanStatus {
        self.ledger.loan(loan_id).await.unwrap().status
    }

    pub async fn link_savings(&self, loan_id: LoanId, account_id: u64, available: Decimal) {
        self.ledger
            .link_savings_account(loan_id, account_id, Balance::new(available))
            .await;
    }
}

pub fn loan(id: LoanId, principal: Decimal) -> LoanSnapshot {
    LoanSnapshot {
        id,
        product_id: PRODUCT,
        principal,
        status: LoanStatus::SubmittedAndPendingApproval,
        expected_disbursement_date: None,
        lien_transaction_id: None,
        approval_schedule_active: true,
    }
}

pub fn approver(id: ApproverId, roles: &[RoleId]) -> Approver {
    Approver {
        id,
        role_ids: roles.to_vec(),
        active: true,
    }
}

pub fn entry(rank: u32, role: RoleId, limit: Option<Decimal>) -> TemplateEntry {
    TemplateEntry {
        rank,
        authority_role_id: role,
        max_approval_amount: Threshold::from(limit),
    }
}

pub fn three_level_template() -> ApprovalChainTemplate {
    ApprovalChainTemplate::new(
        PRODUCT,
        vec![
            entry(0, ROLE_A, None),
            entry(1, ROLE_B, Some(dec!(50000))),
            entry(2, ROLE_C, None),
        ],
    )
    .unwrap()
}

/// Number of PENDING steps of a chain.
pub fn pending_count(steps: &[ApprovalStep]) -> usize {
    steps.iter().filter(|step| step.status == StepStatus::Pending).count()
}
