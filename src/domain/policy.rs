use super::RoleId;
use super::template::TemplateEntry;
use rust_decimal::Decimal;

/// A required approval after filtering, re-ranked densely from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStep {
    pub rank: u32,
    pub authority_role_id: RoleId,
    /// Rank of the template entry this step came from.
    pub template_rank: u32,
}

/// Builds the approval chain a loan of `principal` has to pass.
///
/// Entries whose limit is below the principal are dropped entirely, so the
/// number of approvals depends on the loan size. Survivors keep their relative
/// order. An empty result means no configured authority covers the amount.
pub fn build_chain(principal: Decimal, template: &[TemplateEntry]) -> Vec<ChainStep> {
    template
        .iter()
        .filter(|entry| entry.max_approval_amount.covers(principal))
        .enumerate()
        .map(|(rank, entry)| ChainStep {
            rank: rank as u32,
            authority_role_id: entry.authority_role_id,
            template_rank: entry.rank,
        })
        .collect()
}
