use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree, abort,
};
use tracing::debug;

use super::{
    CompletionTick, JobStore, OutcomeWrite, StoreError, StoreResult, count_in, record_in,
    transition_in,
};
use crate::job::{Job, JobEvent, JobSnapshot, JobStatus, Transition, Unit, UnitOutcome};

const TREE: &str = "blockvoice_jobs";

/// Crash-tolerant store backed by sled.
///
/// Layout: `job/<id>` holds the job record and `unit/<id>/<index>` holds one
/// record per unit. Every operation is a serializable sled transaction over
/// the keys it touches, run on the blocking thread pool.
pub struct SledStore {
    db: sled::Db,
    tree: sled::Tree,
}

fn unavailable(err: sled::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn join_failed(err: tokio::task::JoinError) -> StoreError {
    StoreError::Unavailable(format!("store task failed: {err}"))
}

fn job_key(job_id: &str) -> Vec<u8> {
    format!("job/{job_id}").into_bytes()
}

fn unit_key(job_id: &str, index: usize) -> Vec<u8> {
    format!("unit/{job_id}/{index:010}").into_bytes()
}

fn corrupt<E: std::fmt::Display>(err: E) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(StoreError::Corrupt(err.to_string()))
}

fn get_json<T: DeserializeOwned>(
    tx: &TransactionalTree,
    key: &[u8],
) -> ConflictableTransactionResult<Option<T>, StoreError> {
    match tx.get(key)? {
        Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(corrupt),
        None => Ok(None),
    }
}

fn put_json<T: Serialize>(
    tx: &TransactionalTree,
    key: &[u8],
    value: &T,
) -> ConflictableTransactionResult<(), StoreError> {
    let bytes = serde_json::to_vec(value).map_err(corrupt)?;
    tx.insert(key, bytes)?;
    Ok(())
}

fn load_job(tx: &TransactionalTree, job_id: &str) -> ConflictableTransactionResult<Job, StoreError> {
    match get_json::<Job>(tx, &job_key(job_id))? {
        Some(job) => Ok(job),
        None => abort(StoreError::JobNotFound(job_id.to_string())),
    }
}

fn load_unit(
    tx: &TransactionalTree,
    job_id: &str,
    index: usize,
) -> ConflictableTransactionResult<Unit, StoreError> {
    match get_json::<Unit>(tx, &unit_key(job_id, index))? {
        Some(unit) => Ok(unit),
        None => abort(StoreError::UnitNotFound {
            job_id: job_id.to_string(),
            index,
        }),
    }
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = sled::open(path.as_ref()).map_err(unavailable)?;
        Self::from_db(db)
    }

    /// A store that is deleted when dropped.
    pub fn temporary() -> StoreResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(unavailable)?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> StoreResult<Self> {
        let tree = db.open_tree(TREE).map_err(unavailable)?;
        Ok(Self { db, tree })
    }

    async fn txn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: Fn(&TransactionalTree) -> ConflictableTransactionResult<T, StoreError> + Send + 'static,
    {
        let tree = self.tree.clone();
        tokio::task::spawn_blocking(move || tree.transaction(f))
            .await
            .map_err(join_failed)?
            .map_err(|err| match err {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => unavailable(err),
            })
    }
}

#[async_trait]
impl JobStore for SledStore {
    async fn create_job(&self, job: &Job, units: &[Unit]) -> StoreResult<()> {
        let (job, units) = (job.clone(), units.to_vec());
        let unit_total = units.len();
        let job_id = job.id.clone();
        self.txn(move |tx| {
            if tx.get(job_key(&job.id))?.is_some() {
                return abort(StoreError::AlreadyExists(job.id.clone()));
            }
            put_json(tx, &job_key(&job.id), &job)?;
            for unit in &units {
                put_json(tx, &unit_key(&job.id, unit.index), unit)?;
            }
            Ok(())
        })
        .await?;
        debug!(job_id = %job_id, units = unit_total, "job persisted");
        Ok(())
    }

    async fn record_outcome(
        &self,
        job_id: &str,
        index: usize,
        outcome: UnitOutcome,
    ) -> StoreResult<OutcomeWrite> {
        let job_id = job_id.to_string();
        self.txn(move |tx| {
            load_job(tx, &job_id)?;
            let mut unit = load_unit(tx, &job_id, index)?;
            let write = match record_in(&job_id, std::slice::from_mut(&mut unit), 0, &outcome) {
                Ok(write) => write,
                Err(err) => return abort(err),
            };
            if write == OutcomeWrite::Recorded {
                put_json(tx, &unit_key(&job_id, index), &unit)?;
            }
            Ok(write)
        })
        .await
    }

    async fn increment_completed(&self, job_id: &str, index: usize) -> StoreResult<CompletionTick> {
        let job_id = job_id.to_string();
        self.txn(move |tx| {
            let mut job = load_job(tx, &job_id)?;
            let mut unit = load_unit(tx, &job_id, index)?;
            let tick = count_in(&mut job, &mut unit);
            if tick.counted_now {
                put_json(tx, &unit_key(&job_id, index), &unit)?;
                put_json(tx, &job_key(&job_id), &job)?;
            }
            Ok(tick)
        })
        .await
    }

    async fn unit(&self, job_id: &str, index: usize) -> StoreResult<Unit> {
        let job_id = job_id.to_string();
        self.txn(move |tx| {
            load_job(tx, &job_id)?;
            load_unit(tx, &job_id, index)
        })
        .await
    }

    async fn snapshot(&self, job_id: &str) -> StoreResult<JobSnapshot> {
        let job_id = job_id.to_string();
        self.txn(move |tx| {
            let job = load_job(tx, &job_id)?;
            let units = (0..job.unit_count)
                .map(|index| load_unit(tx, &job_id, index))
                .collect::<ConflictableTransactionResult<Vec<_>, StoreError>>()?;
            Ok(JobSnapshot { job, units })
        })
        .await
    }

    async fn transition(
        &self,
        job_id: &str,
        expected: JobStatus,
        event: JobEvent,
    ) -> StoreResult<Transition> {
        let job_id = job_id.to_string();
        self.txn(move |tx| {
            let mut job = load_job(tx, &job_id)?;
            let transition = match transition_in(&mut job, expected, event.clone()) {
                Ok(transition) => transition,
                Err(err) => return abort(err),
            };
            if transition.applied() {
                put_json(tx, &job_key(&job_id), &job)?;
            }
            Ok(transition)
        })
        .await
    }

    async fn list_jobs(&self) -> StoreResult<Vec<Job>> {
        let tree = self.tree.clone();
        tokio::task::spawn_blocking(move || {
            tree.scan_prefix(b"job/")
                .values()
                .map(|value| {
                    let bytes = value.map_err(unavailable)?;
                    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
                })
                .collect()
        })
        .await
        .map_err(join_failed)?
    }

    async fn flush(&self) -> StoreResult<()> {
        self.db.flush_async().await.map_err(unavailable)?;
        Ok(())
    }
}
