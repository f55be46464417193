use crate::application::commands::{ApproveCommand, ReassignCommand, RejectCommand, UndoCommand};
use crate::domain::{ApproverId, LoanId, PaymentTypeId, StepId};
use crate::error::{Result, WorkflowError};
use chrono::NaiveDate;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Scan,
    Build,
    Approve,
    Reject,
    Undo,
    Reassign,
}

/// One row of a command file: `action,loan,step,approver,target,note,date,payment_type`.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct CommandRecord {
    pub action: Action,
    pub loan: Option<LoanId>,
    pub step: Option<StepId>,
    pub approver: Option<ApproverId>,
    pub target: Option<StepId>,
    pub note: Option<String>,
    pub date: Option<NaiveDate>,
    pub payment_type: Option<PaymentTypeId>,
}

/// A validated command, ready for the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowRequest {
    Scan,
    Build(LoanId),
    Approve(ApproveCommand),
    Reject(RejectCommand),
    Undo(UndoCommand),
    Reassign(ReassignCommand),
}

fn required<T>(value: Option<T>, action: Action, field: &str) -> Result<T> {
    value.ok_or_else(|| {
        WorkflowError::ValidationError(format!("{:?} command requires a '{}' value", action, field))
    })
}

impl TryFrom<CommandRecord> for WorkflowRequest {
    type Error = WorkflowError;

    fn try_from(record: CommandRecord) -> Result<Self> {
        let action = record.action;
        let note = record.note.unwrap_or_default();

        let request = match action {
            Action::Scan => WorkflowRequest::Scan,
            Action::Build => WorkflowRequest::Build(required(record.loan, action, "loan")?),
            Action::Approve => WorkflowRequest::Approve(ApproveCommand {
                loan_id: required(record.loan, action, "loan")?,
                step_id: required(record.step, action, "step")?,
                note,
                disbursement_date: record.date,
                payment_type_id: record.payment_type,
            }),
            Action::Reject => WorkflowRequest::Reject(RejectCommand {
                loan_id: required(record.loan, action, "loan")?,
                step_id: required(record.step, action, "step")?,
                note,
            }),
            Action::Undo => WorkflowRequest::Undo(UndoCommand {
                loan_id: required(record.loan, action, "loan")?,
                step_id: required(record.step, action, "step")?,
                note,
                undo_to_step_id: record.target,
            }),
            Action::Reassign => WorkflowRequest::Reassign(ReassignCommand {
                loan_id: required(record.loan, action, "loan")?,
                step_id: required(record.step, action, "step")?,
                note,
                new_approver_id: required(record.approver, action, "approver")?,
            }),
        };
        Ok(request)
    }
}

/// Reads workflow commands from a CSV source.
///
/// Whitespace is trimmed and short rows are accepted; trailing columns a
/// command does not need may be left out.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    /// Creates a new `CommandReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and validates commands.
    pub fn commands(self) -> impl Iterator<Item = Result<WorkflowRequest>> {
        self.reader.into_deserialize().map(|result| {
            let record: CommandRecord = result.map_err(WorkflowError::from)?;
            WorkflowRequest::try_from(record)
        })
    }
}
