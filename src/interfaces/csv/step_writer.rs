use crate::domain::step::{ApprovalStep, StepStatus};
use crate::domain::{ApproverId, LoanId, StepId};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct StepRecord {
    loan: LoanId,
    step: StepId,
    rank: u32,
    status: StepStatus,
    approver: Option<ApproverId>,
}

/// Writes approval steps as CSV: `loan,step,rank,status,approver`.
pub struct StepWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> StepWriter<W> {
    pub fn new(destination: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(destination),
        }
    }

    /// Writes the steps ordered by loan and rank, then flushes.
    pub fn write_steps(&mut self, mut steps: Vec<ApprovalStep>) -> Result<()> {
        steps.sort_by_key(|step| (step.loan_id, step.rank));
        if steps.is_empty() {
            self.writer
                .write_record(["loan", "step", "rank", "status", "approver"])?;
        }
        for step in steps {
            self.writer.serialize(StepRecord {
                loan: step.loan_id,
                step: step.id,
                rank: step.rank,
                status: step.status,
                approver: step.assigned_approver_id,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn step(id: StepId, loan_id: LoanId, rank: u32, status: StepStatus, approver: Option<ApproverId>) -> ApprovalStep {
        let now = Utc::now();
        ApprovalStep {
            id,
            loan_id,
            rank,
            status,
            assigned_approver_id: approver,
            created_at: now,
            modified_at: now,
        }
    }

    #[test]
    fn test_writer_orders_by_loan_and_rank() {
        let mut buffer = Vec::new();
        StepWriter::new(&mut buffer)
            .write_steps(vec![
                step(3, 2, 0, StepStatus::Pending, Some(7)),
                step(2, 1, 1, StepStatus::Queue, None),
                step(1, 1, 0, StepStatus::Approved, Some(5)),
            ])
            .unwrap();

        let output = String::from_utf8(buffer).unwrap();
        assert_eq!(
            output,
            "loan,step,rank,status,approver\n1,1,0,APPROVED,5\n1,2,1,QUEUE,\n2,3,0,PENDING,7\n"
        );
    }

    #[test]
    fn test_writer_emits_header_without_steps() {
        let mut buffer = Vec::new();
        StepWriter::new(&mut buffer).write_steps(Vec::new()).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "loan,step,rank,status,approver\n");
    }
}
