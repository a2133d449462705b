//! The assembly step: turn a job's unit artifacts into one composite.
//!
//! The executor that observed the counter reach `unit_count` calls
//! [`Assembler::assemble`], as does a redelivery of an already counted unit
//! once the barrier is crossed. Only the `processing → completed`
//! compare-and-set publishes a composite, so extra calls are no-ops.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::audio::{self, Segment};
use crate::error::Result;
use crate::job::{
    ArtifactRef, FailureKind, JobEvent, JobFailure, JobSnapshot, JobStatus, Transition,
    UnitArtifact, UnitFailure, UnitOutcome,
};
use crate::runtime::Runtime;

/// What to do with a finished job in which some units failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Fail the whole job and report the failed units. No composite.
    #[default]
    FailJob,
    /// Assemble the units that succeeded and record the rest as skipped.
    /// A job in which every unit failed still fails.
    AssembleSucceeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyOutcome {
    Completed {
        composite: ArtifactRef,
        duration_ms: u64,
    },
    Failed {
        failure: JobFailure,
    },
    /// The job was not in a state to assemble; nothing was written.
    Skipped {
        status: JobStatus,
    },
}

pub struct Assembler {
    runtime: Runtime,
}

impl Assembler {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    pub async fn assemble(&self, job_id: &str) -> Result<AssemblyOutcome> {
        let snapshot = self.runtime.store.snapshot(job_id).await?;
        let job = &snapshot.job;
        if job.status != JobStatus::Processing || job.composite.is_some() {
            warn!(job_id, status = %job.status, "assembly skipped, job is not processing");
            return Ok(AssemblyOutcome::Skipped { status: job.status });
        }

        if let Some(pending) = snapshot.units.iter().find(|u| u.outcome.is_pending()) {
            let failure = JobFailure::new(format!(
                "assembly started with unit {} still pending",
                pending.index
            ))
            .with_units(vec![UnitFailure {
                index: pending.index,
                kind: FailureKind::Consistency,
                message: "outcome missing at assembly time".into(),
            }]);
            return self.fail(job_id, failure).await;
        }

        let failed = snapshot.failed_units();
        let skipped = if failed.is_empty() {
            Vec::new()
        } else if self.runtime.settings.failure_policy == FailurePolicy::FailJob
            || failed.len() == snapshot.units.len()
        {
            let failure = JobFailure::new(format!(
                "{} of {} units failed",
                failed.len(),
                snapshot.units.len()
            ))
            .with_units(failed);
            return self.fail(job_id, failure).await;
        } else {
            warn!(job_id, skipped = failed.len(), "assembling without failed units");
            failed
        };

        let bytes = match self.build(&snapshot).await {
            Ok(bytes) => bytes,
            Err(failure) => return self.fail(job_id, failure).await,
        };
        let duration_ms = audio::duration_ms(&bytes)?;

        let path = self.runtime.workspace.composite_path(job_id);
        if let Err(e) = self.runtime.workspace.write(&path, &bytes).await {
            warn!(job_id, error = %e, "failed to write composite to working area");
        }
        let composite = match self
            .runtime
            .storage
            .store(&format!("{job_id}/final.wav"), &bytes)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                return self
                    .fail(job_id, JobFailure::new(format!("failed to store composite: {e}")))
                    .await;
            }
        };

        let transition = self
            .runtime
            .store
            .transition(
                job_id,
                JobStatus::Processing,
                JobEvent::Assembled {
                    composite: composite.clone(),
                    skipped,
                },
            )
            .await?;
        match transition {
            Transition::Next { .. } => {
                info!(job_id, duration_ms, uri = %composite.primary, "job completed");
                self.runtime
                    .hooks
                    .on_job_completed(job_id, &composite, duration_ms)
                    .await;
                Ok(AssemblyOutcome::Completed {
                    composite,
                    duration_ms,
                })
            }
            Transition::Stale { current } | Transition::Unchanged(current) => {
                warn!(job_id, status = %current, "job changed during assembly, composite discarded");
                Ok(AssemblyOutcome::Skipped { status: current })
            }
        }
    }

    /// Concatenate succeeded units strictly in index order.
    async fn build(&self, snapshot: &JobSnapshot) -> std::result::Result<Vec<u8>, JobFailure> {
        let mut wavs = Vec::with_capacity(snapshot.units.len());
        let mut pauses = Vec::with_capacity(snapshot.units.len());

        let mut units: Vec<_> = snapshot.units.iter().collect();
        units.sort_by_key(|u| u.index);
        for unit in units {
            let UnitOutcome::Succeeded { artifact } = &unit.outcome else {
                continue;
            };
            let wav = self.load(artifact).await.map_err(|message| {
                JobFailure::new("failed to load unit audio").with_units(vec![UnitFailure {
                    index: unit.index,
                    kind: FailureKind::Storage,
                    message,
                }])
            })?;
            wavs.push(wav);
            pauses.push(unit.input.wait_after_ms);
        }

        let segments: Vec<Segment<'_>> = wavs
            .iter()
            .zip(&pauses)
            .map(|(wav, &pause_after_ms)| Segment {
                wav,
                pause_after_ms,
            })
            .collect();
        let clip = audio::concat(&segments)
            .map_err(|e| JobFailure::new(format!("failed to concatenate audio: {e}")))?;
        audio::encode(&clip).map_err(|e| JobFailure::new(format!("failed to encode composite: {e}")))
    }

    /// Local copy first; durable storage if the working area lost it.
    async fn load(&self, artifact: &UnitArtifact) -> std::result::Result<Vec<u8>, String> {
        if let Some(path) = &artifact.local_path {
            match self.runtime.workspace.read(path).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => warn!(path = %path.display(), error = %e, "local unit audio unavailable"),
            }
        }
        self.runtime
            .storage
            .fetch(&artifact.stored)
            .await
            .map_err(|e| e.to_string())
    }

    async fn fail(&self, job_id: &str, failure: JobFailure) -> Result<AssemblyOutcome> {
        error!(job_id, error = %failure, "assembly failed");
        let transition = self
            .runtime
            .store
            .transition(job_id, JobStatus::Processing, JobEvent::Failed(failure.clone()))
            .await?;
        match transition {
            Transition::Next { .. } => {
                self.runtime.hooks.on_job_failed(job_id, &failure).await;
                Ok(AssemblyOutcome::Failed { failure })
            }
            Transition::Stale { current } | Transition::Unchanged(current) => {
                Ok(AssemblyOutcome::Skipped { status: current })
            }
        }
    }
}
