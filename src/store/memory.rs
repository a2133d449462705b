use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{
    CompletionTick, JobStore, OutcomeWrite, StoreError, StoreResult, count_in, record_in,
    transition_in,
};
use crate::job::{Job, JobEvent, JobSnapshot, JobStatus, Transition, Unit, UnitOutcome};

/// In-process store. Each job lives in one map entry, and every operation
/// holds that entry's write guard for its whole read-modify-write.
#[derive(Default)]
pub struct MemoryStore {
    jobs: DashMap<String, JobSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_job<T>(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut JobSnapshot) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        f(entry.value_mut())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, job: &Job, units: &[Unit]) -> StoreResult<()> {
        match self.jobs.entry(job.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(job.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(JobSnapshot {
                    job: job.clone(),
                    units: units.to_vec(),
                });
                Ok(())
            }
        }
    }

    async fn record_outcome(
        &self,
        job_id: &str,
        index: usize,
        outcome: UnitOutcome,
    ) -> StoreResult<OutcomeWrite> {
        self.with_job(job_id, |snap| record_in(job_id, &mut snap.units, index, &outcome))
    }

    async fn increment_completed(&self, job_id: &str, index: usize) -> StoreResult<CompletionTick> {
        self.with_job(job_id, |snap| {
            let unit = snap
                .units
                .get_mut(index)
                .ok_or_else(|| StoreError::UnitNotFound {
                    job_id: job_id.to_string(),
                    index,
                })?;
            Ok(count_in(&mut snap.job, unit))
        })
    }

    async fn unit(&self, job_id: &str, index: usize) -> StoreResult<Unit> {
        let snap = self
            .jobs
            .get(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        snap.units
            .get(index)
            .cloned()
            .ok_or_else(|| StoreError::UnitNotFound {
                job_id: job_id.to_string(),
                index,
            })
    }

    async fn snapshot(&self, job_id: &str) -> StoreResult<JobSnapshot> {
        self.jobs
            .get(job_id)
            .map(|snap| snap.value().clone())
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }

    async fn transition(
        &self,
        job_id: &str,
        expected: JobStatus,
        event: JobEvent,
    ) -> StoreResult<Transition> {
        self.with_job(job_id, |snap| transition_in(&mut snap.job, expected, event))
    }

    async fn list_jobs(&self) -> StoreResult<Vec<Job>> {
        Ok(self.jobs.iter().map(|snap| snap.job.clone()).collect())
    }
}
