//! Job/unit store.
//!
//! Every operation is atomic with respect to other callers on the same job.
//! The counter increment in particular is a single read-modify-write inside
//! the backend; callers never read-then-write it themselves.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::job::{
    InvalidTransition, Job, JobEvent, JobSnapshot, JobStatus, StateMachine, Transition, Unit,
    UnitOutcome,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("unit {index} not found in job {job_id}")]
    UnitNotFound { job_id: String, index: usize },

    #[error("job already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result of a compare-and-set outcome write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeWrite {
    /// The unit moved from `pending` to the given outcome.
    Recorded,
    /// An earlier delivery already wrote this outcome; nothing changed.
    AlreadyRecorded(UnitOutcome),
}

/// Observation returned by the atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionTick {
    /// Post-increment value of `completed_count`.
    pub completed_count: usize,
    pub unit_count: usize,
    /// False when this unit had already been counted; the counter was read,
    /// not incremented.
    pub counted_now: bool,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create the job and all of its units, or nothing if the id exists.
    async fn create_job(&self, job: &Job, units: &[Unit]) -> StoreResult<()>;

    /// Write a unit outcome if, and only if, the unit is still pending.
    async fn record_outcome(
        &self,
        job_id: &str,
        index: usize,
        outcome: UnitOutcome,
    ) -> StoreResult<OutcomeWrite>;

    /// Count unit `index` towards `completed_count` and return the new value.
    /// A unit is counted at most once.
    async fn increment_completed(&self, job_id: &str, index: usize) -> StoreResult<CompletionTick>;

    async fn unit(&self, job_id: &str, index: usize) -> StoreResult<Unit>;

    async fn snapshot(&self, job_id: &str) -> StoreResult<JobSnapshot>;

    /// Apply `event` if the job's status is still `expected`.
    async fn transition(
        &self,
        job_id: &str,
        expected: JobStatus,
        event: JobEvent,
    ) -> StoreResult<Transition>;

    async fn list_jobs(&self) -> StoreResult<Vec<Job>>;

    /// Flush pending writes
    async fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Fail a job from whichever non-terminal status it is currently in.
/// Returns `None` if the job was already terminal.
pub async fn fail_job(
    store: &dyn JobStore,
    job_id: &str,
    failure: crate::job::JobFailure,
) -> StoreResult<Option<JobStatus>> {
    loop {
        let current = store.snapshot(job_id).await?.job.status;
        if current.is_terminal() {
            return Ok(None);
        }
        match store
            .transition(job_id, current, JobEvent::Failed(failure.clone()))
            .await?
        {
            Transition::Next { from, .. } => return Ok(Some(from)),
            Transition::Unchanged(_) => return Ok(None),
            // Raced with another writer; re-read and try again.
            Transition::Stale { .. } => continue,
        }
    }
}

fn record_in(
    job_id: &str,
    units: &mut [Unit],
    index: usize,
    outcome: &UnitOutcome,
) -> StoreResult<OutcomeWrite> {
    let unit = units.get_mut(index).ok_or_else(|| StoreError::UnitNotFound {
        job_id: job_id.to_string(),
        index,
    })?;
    if !unit.outcome.is_pending() {
        return Ok(OutcomeWrite::AlreadyRecorded(unit.outcome.clone()));
    }
    unit.outcome = outcome.clone();
    Ok(OutcomeWrite::Recorded)
}

fn count_in(job: &mut Job, unit: &mut Unit) -> CompletionTick {
    let counted_now = !unit.counted;
    if counted_now {
        unit.counted = true;
        job.completed_count += 1;
        job.updated_at = Utc::now();
    }
    CompletionTick {
        completed_count: job.completed_count,
        unit_count: job.unit_count,
        counted_now,
    }
}

fn transition_in(job: &mut Job, expected: JobStatus, event: JobEvent) -> StoreResult<Transition> {
    if job.status != expected {
        return Ok(Transition::Stale {
            current: job.status,
        });
    }
    Ok(StateMachine::apply(job, event, Utc::now())?)
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every backend must share.

    use std::sync::Arc;

    use super::*;
    use crate::job::{ArtifactRef, FailureKind, JobFailure, UnitArtifact, UnitFailure, UnitInput};

    pub fn sample(n: usize) -> (Job, Vec<Unit>) {
        Job::with_units(
            (0..n)
                .map(|i| UnitInput::new(format!("block {i}"), "openai", "alloy"))
                .collect(),
        )
    }

    pub fn succeeded(index: usize) -> UnitOutcome {
        UnitOutcome::Succeeded {
            artifact: UnitArtifact {
                local_path: None,
                stored: ArtifactRef {
                    primary: format!("local:unit-{index}.wav"),
                    mirror: None,
                },
                duration_ms: 100,
            },
        }
    }

    pub async fn create_is_exclusive(store: &dyn JobStore) {
        let (job, units) = sample(2);
        store.create_job(&job, &units).await.unwrap();
        let err = store.create_job(&job, &units).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));

        let snap = store.snapshot(&job.id).await.unwrap();
        assert_eq!(snap.units.len(), 2);
        assert_eq!(snap.job.status, JobStatus::Queued);
    }

    pub async fn outcome_write_is_compare_and_set(store: &dyn JobStore) {
        let (job, units) = sample(1);
        store.create_job(&job, &units).await.unwrap();

        let first = store.record_outcome(&job.id, 0, succeeded(0)).await.unwrap();
        assert_eq!(first, OutcomeWrite::Recorded);

        let failed = UnitOutcome::Failed {
            failure: UnitFailure {
                index: 0,
                kind: FailureKind::Synthesis,
                message: "late duplicate".into(),
            },
        };
        let second = store.record_outcome(&job.id, 0, failed).await.unwrap();
        assert_eq!(second, OutcomeWrite::AlreadyRecorded(succeeded(0)));
        assert_eq!(store.unit(&job.id, 0).await.unwrap().outcome, succeeded(0));
    }

    pub async fn increment_counts_each_unit_once(store: &dyn JobStore) {
        let (job, units) = sample(2);
        store.create_job(&job, &units).await.unwrap();

        let t = store.increment_completed(&job.id, 1).await.unwrap();
        assert_eq!((t.completed_count, t.unit_count, t.counted_now), (1, 2, true));

        let dup = store.increment_completed(&job.id, 1).await.unwrap();
        assert_eq!((dup.completed_count, dup.counted_now), (1, false));

        let t = store.increment_completed(&job.id, 0).await.unwrap();
        assert_eq!((t.completed_count, t.counted_now), (2, true));

        let err = store.increment_completed(&job.id, 7).await.unwrap_err();
        assert!(matches!(err, StoreError::UnitNotFound { index: 7, .. }));
    }

    pub async fn transition_is_compare_and_set(store: &dyn JobStore) {
        let (job, units) = sample(1);
        store.create_job(&job, &units).await.unwrap();

        let t = store
            .transition(&job.id, JobStatus::Processing, JobEvent::UnitRecorded)
            .await
            .unwrap();
        assert_eq!(
            t,
            Transition::Stale {
                current: JobStatus::Queued
            }
        );

        let t = store
            .transition(&job.id, JobStatus::Queued, JobEvent::UnitRecorded)
            .await
            .unwrap();
        assert!(t.applied());

        let composite = ArtifactRef {
            primary: "local:final.wav".into(),
            mirror: None,
        };
        store
            .transition(
                &job.id,
                JobStatus::Processing,
                JobEvent::Assembled {
                    composite: composite.clone(),
                    skipped: Vec::new(),
                },
            )
            .await
            .unwrap();

        let err = store
            .transition(
                &job.id,
                JobStatus::Completed,
                JobEvent::Failed(JobFailure::new("too late")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));

        let snap = store.snapshot(&job.id).await.unwrap();
        assert_eq!(snap.job.status, JobStatus::Completed);
        assert_eq!(snap.job.composite, Some(composite));
    }

    pub async fn missing_job_is_reported(store: &dyn JobStore) {
        assert!(matches!(
            store.snapshot("nope").await.unwrap_err(),
            StoreError::JobNotFound(_)
        ));
        assert!(matches!(
            store.increment_completed("nope", 0).await.unwrap_err(),
            StoreError::JobNotFound(_)
        ));
    }

    pub async fn concurrent_increments_cross_total_once(store: Arc<dyn JobStore>) {
        let n = 32;
        let (job, units) = sample(n);
        store.create_job(&job, &units).await.unwrap();

        let mut handles = Vec::new();
        for index in 0..n {
            // Every unit delivered twice.
            for _ in 0..2 {
                let store = store.clone();
                let job_id = job.id.clone();
                handles.push(tokio::spawn(async move {
                    store.increment_completed(&job_id, index).await.unwrap()
                }));
            }
        }

        let mut observed_total = 0;
        for handle in handles {
            let tick = handle.await.unwrap();
            assert!(tick.completed_count <= n);
            if tick.counted_now && tick.completed_count == n {
                observed_total += 1;
            }
        }
        assert_eq!(observed_total, 1);
        assert_eq!(store.snapshot(&job.id).await.unwrap().job.completed_count, n);
    }

    pub async fn fail_job_from_any_live_status(store: &dyn JobStore) {
        let (job, units) = sample(1);
        store.create_job(&job, &units).await.unwrap();

        let from = fail_job(store, &job.id, JobFailure::new("timed out")).await.unwrap();
        assert_eq!(from, Some(JobStatus::Queued));
        let again = fail_job(store, &job.id, JobFailure::new("timed out")).await.unwrap();
        assert_eq!(again, None);
    }
}
