use crate::domain::ports::ChainStore;
use crate::domain::step::{ApprovalStep, StepBatch, StepDraft, StepHistory, StepStatus};
use crate::domain::{ApproverId, LoanId, StepId};
use crate::error::{Result, WorkflowError};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Column Family for approval steps, keyed by step id.
pub const CF_STEPS: &str = "steps";
/// Column Family indexing steps by loan: `loan_id ++ step_id`, empty value.
pub const CF_LOAN_STEPS: &str = "loan_steps";
/// Column Family for step history: `step_id ++ sequence`.
pub const CF_HISTORY: &str = "history";
/// Column Family for id sequences.
pub const CF_META: &str = "meta";

const NEXT_STEP_ID: &[u8] = b"next_step_id";
const NEXT_HISTORY_SEQ: &[u8] = b"next_history_seq";

fn internal(message: impl Into<String>) -> WorkflowError {
    WorkflowError::InternalError(Box::new(std::io::Error::other(message.into())))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| internal(format!("Serialization error: {}", e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| internal(format!("Deserialization error: {}", e)))
}

fn pair_key(first: u64, second: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&first.to_be_bytes());
    key[8..].copy_from_slice(&second.to_be_bytes());
    key
}

/// A persistent chain store using RocksDB.
///
/// Steps, the loan index, history and id sequences live in separate Column
/// Families. Chain creation and batch commits go through a single
/// `WriteBatch` each, so a unit of work lands completely or not at all.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBChainStore {
    db: Arc<DB>,
    // Sequence allocation is read-modify-write; writers take turns.
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBChainStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_STEPS, CF_LOAN_STEPS, CF_HISTORY, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| internal(format!("Column family '{}' not found", name)))
    }

    fn read_sequence(&self, key: &[u8]) -> Result<u64> {
        let meta = self.cf(CF_META)?;
        match self.db.get_cf(meta, key)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| internal("Corrupted sequence value"))?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn load_step(&self, step_id: StepId) -> Result<Option<ApprovalStep>> {
        let steps = self.cf(CF_STEPS)?;
        match self.db.get_cf(steps, step_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn append_history(&self, batch: &mut WriteBatch, seq: &mut u64, entry: &StepHistory) -> Result<()> {
        *seq += 1;
        batch.put_cf(self.cf(CF_HISTORY)?, pair_key(entry.step_id, *seq), encode(entry)?);
        Ok(())
    }
}

#[async_trait]
impl ChainStore for RocksDBChainStore {
    async fn create_chain(&self, drafts: Vec<StepDraft>) -> Result<Vec<ApprovalStep>> {
        let _writer = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next_id = self.read_sequence(NEXT_STEP_ID)?;
        let mut seq = self.read_sequence(NEXT_HISTORY_SEQ)?;
        let now = Utc::now();

        let mut batch = WriteBatch::default();
        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            next_id += 1;
            let step = ApprovalStep {
                id: next_id,
                loan_id: draft.loan_id,
                rank: draft.rank,
                status: draft.initial_status(),
                assigned_approver_id: draft.assigned_approver_id,
                created_at: now,
                modified_at: now,
            };
            batch.put_cf(self.cf(CF_STEPS)?, step.id.to_be_bytes(), encode(&step)?);
            batch.put_cf(self.cf(CF_LOAN_STEPS)?, pair_key(step.loan_id, step.id), b"");
            self.append_history(
                &mut batch,
                &mut seq,
                &StepHistory {
                    step_id: step.id,
                    status: step.status,
                    timestamp: now,
                },
            )?;
            created.push(step);
        }
        batch.put_cf(self.cf(CF_META)?, NEXT_STEP_ID, next_id.to_be_bytes());
        batch.put_cf(self.cf(CF_META)?, NEXT_HISTORY_SEQ, seq.to_be_bytes());

        self.db.write(batch)?;
        Ok(created)
    }

    async fn commit(&self, batch: StepBatch) -> Result<()> {
        let _writer = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut seq = self.read_sequence(NEXT_HISTORY_SEQ)?;

        let mut write = WriteBatch::default();
        for step in &batch.updates {
            if self.load_step(step.id)?.is_none() {
                return Err(WorkflowError::StepNotFound(step.id));
            }
            write.put_cf(self.cf(CF_STEPS)?, step.id.to_be_bytes(), encode(step)?);
        }
        for entry in &batch.history {
            self.append_history(&mut write, &mut seq, entry)?;
        }
        write.put_cf(self.cf(CF_META)?, NEXT_HISTORY_SEQ, seq.to_be_bytes());

        self.db.write(write)?;
        Ok(())
    }

    async fn find_by_id(&self, step_id: StepId) -> Result<Option<ApprovalStep>> {
        self.load_step(step_id)
    }

    async fn find_by_loan_id(&self, loan_id: LoanId) -> Result<Vec<ApprovalStep>> {
        let index = self.cf(CF_LOAN_STEPS)?;
        let prefix = loan_id.to_be_bytes();
        let mut steps = Vec::new();

        for item in self.db.iterator_cf(index, IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, _) = item?;
            if key.len() != 16 || key[..8] != prefix {
                break;
            }
            let step_id = u64::from_be_bytes(
                <[u8; 8]>::try_from(&key[8..]).map_err(|_| internal("Corrupted loan index key"))?,
            );
            let step = self
                .load_step(step_id)?
                .ok_or_else(|| internal(format!("Loan index points at missing step {}", step_id)))?;
            steps.push(step);
        }

        steps.sort_by_key(|step| step.rank);
        Ok(steps)
    }

    async fn history(&self, step_id: StepId) -> Result<Vec<StepHistory>> {
        let cf = self.cf(CF_HISTORY)?;
        let prefix = step_id.to_be_bytes();
        let mut entries = Vec::new();

        for item in self.db.iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, value) = item?;
            if key.len() != 16 || key[..8] != prefix {
                break;
            }
            entries.push(decode(&value)?);
        }
        Ok(entries)
    }

    async fn pending_loads(&self, approvers: &[ApproverId]) -> Result<HashMap<ApproverId, usize>> {
        let mut loads = HashMap::new();
        for step in self.all_steps().await? {
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
        let cf = self.cf(CF_STEPS)?;
        let mut steps = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            steps.push(decode(&value)?);
        }
        Ok(steps)
    }
}
