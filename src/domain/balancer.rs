use super::{ApproverId, RoleId};
use crate::error::WorkflowError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A staff member who may hold approval steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approver {
    pub id: ApproverId,
    #[serde(default)]
    pub role_ids: Vec<RoleId>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Approver {
    pub fn holds_role(&self, role_id: RoleId) -> bool {
        self.role_ids.contains(&role_id)
    }
}

/// Picks the least loaded approver among `candidates`.
///
/// `loads` maps approvers to their number of PENDING steps and only lists
/// approvers with at least one. Ties go to the lowest approver id. With an
/// empty load map the first candidate in enumeration order wins.
///
/// The load figures are a snapshot; two concurrent callers can legitimately
/// pick the same approver.
pub fn pick_approver<'a>(
    role_id: RoleId,
    candidates: &'a [Approver],
    loads: &HashMap<ApproverId, usize>,
) -> Result<&'a Approver, WorkflowError> {
    let first = candidates
        .first()
        .ok_or(WorkflowError::NoEligibleApprover(role_id))?;

    if loads.is_empty() {
        return Ok(first);
    }

    Ok(candidates
        .iter()
        .min_by_key(|approver| (loads.get(&approver.id).copied().unwrap_or(0), approver.id))
        .unwrap_or(first))
}
