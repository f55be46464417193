use crate::domain::balancer::Approver;
use crate::domain::ports::{AuthorityDirectory, ChainStore};
use crate::domain::step::{ApprovalStep, StepBatch, StepDraft, StepHistory, StepStatus};
use crate::domain::template::ApprovalChainTemplate;
use crate::domain::{ApproverId, LoanId, ProductId, RoleId, StepId};
use crate::error::{Result, WorkflowError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct ChainTables {
    steps: BTreeMap<StepId, ApprovalStep>,
    history: Vec<StepHistory>,
    next_step_id: StepId,
}

/// A thread-safe in-memory store for approval steps.
///
/// All tables sit behind a single `RwLock`, so chain creation and batch
/// commits are atomic. `Clone` shares the underlying tables.
#[derive(Default, Clone)]
pub struct InMemoryChainStore {
    tables: Arc<RwLock<ChainTables>>,
}

impl InMemoryChainStore {
    /// Creates a new, empty in-memory chain store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChainStore for InMemoryChainStore {
    async fn create_chain(&self, drafts: Vec<StepDraft>) -> Result<Vec<ApprovalStep>> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let mut created = Vec::with_capacity(drafts.len());

        for draft in drafts {
            tables.next_step_id += 1;
            let step = ApprovalStep {
                id: tables.next_step_id,
                loan_id: draft.loan_id,
                rank: draft.rank,
                status: draft.initial_status(),
                assigned_approver_id: draft.assigned_approver_id,
                created_at: now,
                modified_at: now,
            };
            tables.history.push(StepHistory {
                step_id: step.id,
                status: step.status,
                timestamp: now,
            });
            tables.steps.insert(step.id, step.clone());
            created.push(step);
        }

        Ok(created)
    }

    async fn commit(&self, batch: StepBatch) -> Result<()> {
        let mut tables = self.tables.write().await;

        if let Some(missing) = batch
            .updates
            .iter()
            .find(|step| !tables.steps.contains_key(&step.id))
        {
            return Err(WorkflowError::StepNotFound(missing.id));
        }

        for step in batch.updates {
            tables.steps.insert(step.id, step);
        }
        tables.history.extend(batch.history);
        Ok(())
    }

    async fn find_by_id(&self, step_id: StepId) -> Result<Option<ApprovalStep>> {
        let tables = self.tables.read().await;
        Ok(tables.steps.get(&step_id).cloned())
    }

    async fn find_by_loan_id(&self, loan_id: LoanId) -> Result<Vec<ApprovalStep>> {
        let tables = self.tables.read().await;
        let mut steps: Vec<_> = tables
            .steps
            .values()
            .filter(|step| step.loan_id == loan_id)
            .cloned()
            .collect();
        steps.sort_by_key(|step| step.rank);
        Ok(steps)
    }

    async fn history(&self, step_id: StepId) -> Result<Vec<StepHistory>> {
        let tables = self.tables.read().await;
        Ok(tables
            .history
            .iter()
            .filter(|entry| entry.step_id == step_id)
            .cloned()
            .collect())
    }

    async fn pending_loads(&self, approvers: &[ApproverId]) -> Result<HashMap<ApproverId, usize>> {
        let tables = self.tables.read().await;
        let mut loads = HashMap::new();
        for step in tables.steps.values() {
            if step.status == StepStatus::Pending
                && let Some(approver_id) = step.assigned_approver_id
                && approvers.contains(&approver_id)
            {
                *loads.entry(approver_id).or_insert(0) += 1;
            }
        }
        Ok(loads)
    }

    async fn all_steps(&self) -> Result<Vec<ApprovalStep>> {
        let tables = self.tables.read().await;
        Ok(tables.steps.values().cloned().collect())
    }
}

#[derive(Default)]
struct Authorities {
    templates: HashMap<ProductId, ApprovalChainTemplate>,
    approvers: Vec<Approver>,
}

/// In-memory chain templates and approvers.
///
/// Approvers are enumerated in registration order.
#[derive(Default, Clone)]
pub struct InMemoryDirectory {
    authorities: Arc<RwLock<Authorities>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the chain template of a product. A product has at most one.
    pub async fn add_template(&self, template: ApprovalChainTemplate) -> Result<()> {
        let mut authorities = self.authorities.write().await;
        if authorities.templates.contains_key(&template.product_id()) {
            return Err(WorkflowError::ValidationError(format!(
                "Product {} already has an approval chain template",
                template.product_id()
            )));
        }
        authorities.templates.insert(template.product_id(), template);
        Ok(())
    }

    /// Registers an approver, replacing an earlier record with the same id.
    pub async fn add_approver(&self, approver: Approver) {
        let mut authorities = self.authorities.write().await;
        match authorities.approvers.iter_mut().find(|a| a.id == approver.id) {
            Some(existing) => *existing = approver,
            None => authorities.approvers.push(approver),
        }
    }
}

#[async_trait]
impl AuthorityDirectory for InMemoryDirectory {
    async fn chain_template(&self, product_id: ProductId) -> Result<Option<ApprovalChainTemplate>> {
        let authorities = self.authorities.read().await;
        Ok(authorities.templates.get(&product_id).cloned())
    }

    async fn active_approvers(&self, role_id: RoleId) -> Result<Vec<Approver>> {
        let authorities = self.authorities.read().await;
        Ok(authorities
            .approvers
            .iter()
            .filter(|approver| approver.active && approver.holds_role(role_id))
            .cloned()
            .collect())
    }

    async fn find_approver(&self, approver_id: ApproverId) -> Result<Option<Approver>> {
        let authorities = self.authorities.read().await;
        Ok(authorities
            .approvers
            .iter()
            .find(|approver| approver.id == approver_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::template::TemplateEntry;

    fn drafts(loan_id: LoanId, approvers: &[Option<ApproverId>]) -> Vec<StepDraft> {
        approvers
            .iter()
            .enumerate()
            .map(|(rank, approver)| StepDraft {
                loan_id,
                rank: rank as u32,
                assigned_approver_id: *approver,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_chain_sets_initial_statuses_and_history() {
        let store = InMemoryChainStore::new();
        let created = store
            .create_chain(drafts(1, &[Some(10), Some(20), None]))
            .await
            .unwrap();

        let statuses: Vec<_> = created.iter().map(|step| step.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Pending, StepStatus::Queue, StepStatus::Queue]
        );

        for step in &created {
            let history = store.history(step.id).await.unwrap();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].status, step.status);
        }
    }

    #[tokio::test]
    async fn test_find_by_loan_id_orders_by_rank() {
        let store = InMemoryChainStore::new();
        store.create_chain(drafts(1, &[Some(10), Some(20)])).await.unwrap();
        store.create_chain(drafts(2, &[Some(10)])).await.unwrap();

        let steps = store.find_by_loan_id(1).await.unwrap();
        assert_eq!(steps.iter().map(|s| s.rank).collect::<Vec<_>>(), vec![0, 1]);
        assert!(steps.iter().all(|s| s.loan_id == 1));
        assert!(store.find_by_loan_id(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_rejects_unknown_step_without_partial_writes() {
        let store = InMemoryChainStore::new();
        let created = store.create_chain(drafts(1, &[Some(10)])).await.unwrap();

        let mut ghost = created[0].clone();
        ghost.id = 999;
        let mut batch = StepBatch::default();
        batch.transition(&created[0], StepStatus::Approved, Utc::now());
        batch.transition(&ghost, StepStatus::Approved, Utc::now());

        let result = store.commit(batch).await;
        assert!(matches!(result, Err(WorkflowError::StepNotFound(999))));

        let unchanged = store.find_by_id(created[0].id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, StepStatus::Pending);
        assert_eq!(store.history(created[0].id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pending_loads_only_counts_pending_steps() {
        let store = InMemoryChainStore::new();
        store.create_chain(drafts(1, &[Some(10), Some(10)])).await.unwrap();
        store.create_chain(drafts(2, &[Some(10)])).await.unwrap();
        store.create_chain(drafts(3, &[Some(20)])).await.unwrap();

        let loads = store.pending_loads(&[10, 20, 30]).await.unwrap();
        assert_eq!(loads.get(&10), Some(&2));
        assert_eq!(loads.get(&20), Some(&1));
        assert_eq!(loads.get(&30), None);

        let filtered = store.pending_loads(&[20]).await.unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[tokio::test]
    async fn test_directory_rejects_second_template_for_product() {
        let directory = InMemoryDirectory::new();
        let entries = vec![TemplateEntry {
            rank: 0,
            authority_role_id: 1,
            max_approval_amount: Default::default(),
        }];
        let template = ApprovalChainTemplate::new(5, entries).unwrap();

        directory.add_template(template.clone()).await.unwrap();
        let result = directory.add_template(template).await;
        assert!(matches!(result, Err(WorkflowError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_directory_lists_active_role_holders_in_order() {
        let directory = InMemoryDirectory::new();
        for (id, roles, active) in [(3, vec![1], true), (1, vec![1, 2], true), (2, vec![1], false)] {
            directory
                .add_approver(Approver {
                    id,
                    role_ids: roles,
                    active,
                })
                .await;
        }

        let ids: Vec<_> = directory
            .active_approvers(1)
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![3, 1]);
        assert!(directory.find_approver(2).await.unwrap().is_some());
        assert!(directory.find_approver(9).await.unwrap().is_none());
    }
}
