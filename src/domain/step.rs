use super::{ApproverId, LoanId, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// The active step of a chain. At most one per loan.
    Pending,
    /// Waiting for the steps below it.
    Queue,
    Approved,
    Rejected,
    /// Only ever written to history; a reassigned step stays `Pending`.
    Reassigned,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Queue => "QUEUE",
            StepStatus::Approved => "APPROVED",
            StepStatus::Rejected => "REJECTED",
            StepStatus::Reassigned => "REASSIGNED",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rank of a loan's approval chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalStep {
    pub id: StepId,
    pub loan_id: LoanId,
    pub rank: u32,
    pub status: StepStatus,
    /// `None` when no eligible approver existed at construction time.
    pub assigned_approver_id: Option<ApproverId>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl ApprovalStep {
    pub fn is_pending(&self) -> bool {
        self.status == StepStatus::Pending
    }
}

/// Immutable audit row written on every status change of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepHistory {
    pub step_id: StepId,
    pub status: StepStatus,
    pub timestamp: DateTime<Utc>,
}

/// Input to bulk chain creation. The store assigns ids and initial statuses.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDraft {
    pub loan_id: LoanId,
    pub rank: u32,
    pub assigned_approver_id: Option<ApproverId>,
}

impl StepDraft {
    /// Rank 0 starts `Pending`, every other rank starts in the `Queue`.
    pub fn initial_status(&self) -> StepStatus {
        if self.rank == 0 {
            StepStatus::Pending
        } else {
            StepStatus::Queue
        }
    }
}

/// Step mutations and history rows belonging to one unit of work.
///
/// Stores apply a batch all-or-nothing, so nothing staged here becomes visible
/// unless every side effect of the transition succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepBatch {
    pub updates: Vec<ApprovalStep>,
    pub history: Vec<StepHistory>,
}

impl StepBatch {
    /// Moves `step` to `status` and records the change in history.
    pub fn transition(&mut self, step: &ApprovalStep, status: StepStatus, at: DateTime<Utc>) {
        let mut updated = step.clone();
        updated.status = status;
        updated.modified_at = at;
        self.stage(updated);
        self.record(step.id, status, at);
    }

    /// Stages an updated copy of a step, replacing an earlier staged copy.
    pub fn stage(&mut self, step: ApprovalStep) {
        match self.updates.iter_mut().find(|staged| staged.id == step.id) {
            Some(staged) => *staged = step,
            None => self.updates.push(step),
        }
    }

    pub fn record(&mut self, step_id: StepId, status: StepStatus, at: DateTime<Utc>) {
        self.history.push(StepHistory {
            step_id,
            status,
            timestamp: at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: StepId, status: StepStatus) -> ApprovalStep {
        let now = Utc::now();
        ApprovalStep {
            id,
            loan_id: 1,
            rank: id as u32,
            status,
            assigned_approver_id: Some(5),
            created_at: now,
            modified_at: now,
        }
    }

    #[test]
    fn test_draft_initial_status() {
        let first = StepDraft {
            loan_id: 1,
            rank: 0,
            assigned_approver_id: None,
        };
        let second = StepDraft { rank: 1, ..first.clone() };
        assert_eq!(first.initial_status(), StepStatus::Pending);
        assert_eq!(second.initial_status(), StepStatus::Queue);
    }

    #[test]
    fn test_batch_transition_stages_and_records() {
        let mut batch = StepBatch::default();
        let pending = step(1, StepStatus::Pending);
        let at = Utc::now();

        batch.transition(&pending, StepStatus::Approved, at);

        assert_eq!(batch.updates.len(), 1);
        assert_eq!(batch.updates[0].status, StepStatus::Approved);
        assert_eq!(batch.updates[0].modified_at, at);
        assert_eq!(
            batch.history,
            vec![StepHistory {
                step_id: 1,
                status: StepStatus::Approved,
                timestamp: at,
            }]
        );
    }

    #[test]
    fn test_batch_stage_replaces_same_step() {
        let mut batch = StepBatch::default();
        let queued = step(2, StepStatus::Queue);
        let at = Utc::now();

        batch.transition(&queued, StepStatus::Pending, at);
        let staged = batch.updates[0].clone();
        batch.transition(&staged, StepStatus::Approved, at);

        assert_eq!(batch.updates.len(), 1);
        assert_eq!(batch.updates[0].status, StepStatus::Approved);
        assert_eq!(batch.history.len(), 2);
    }

    #[test]
    fn test_status_serializes_upper_case() {
        assert_eq!(
            serde_json::to_string(&StepStatus::Reassigned).unwrap(),
            "\"REASSIGNED\""
        );
        assert_eq!(StepStatus::Queue.to_string(), "QUEUE");
    }
}
