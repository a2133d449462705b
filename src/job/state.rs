use chrono::{DateTime, Utc};
use thiserror::Error;

use super::model::{ArtifactRef, Job, JobFailure, JobStatus, UnitFailure};

/// Something that happened to a job and may move it forward.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A unit outcome was written.
    UnitRecorded,
    /// The assembly step persisted the composite.
    Assembled {
        composite: ArtifactRef,
        skipped: Vec<UnitFailure>,
    },
    /// Assembly could not proceed, a consistency check tripped, or the job
    /// exceeded its in-flight budget.
    Failed(JobFailure),
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::UnitRecorded => "unit_recorded",
            JobEvent::Assembled { .. } => "assembled",
            JobEvent::Failed(_) => "failed",
        }
    }
}

/// The result of applying an event to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The job moved to a new status.
    Next { from: JobStatus, to: JobStatus },
    /// The event is accepted but does not change the status.
    Unchanged(JobStatus),
    /// A compare-and-set saw a different status than expected; nothing was written.
    Stale { current: JobStatus },
}

impl Transition {
    pub fn applied(&self) -> bool {
        matches!(self, Transition::Next { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event `{event}` is not allowed in status {from}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub event: &'static str,
}

/// Drives a `Job` through `queued → processing → completed | failed`.
pub struct StateMachine;

impl StateMachine {
    /// Apply `event` to `job`, mutating it in place.
    ///
    /// - `UnitRecorded` moves `Queued` to `Processing` and is a no-op anywhere
    ///   else, so late outcomes for a timed-out job are harmless.
    /// - `Assembled` is only valid from `Processing` and is the only way to
    ///   reach `Completed`, which keeps `status = completed` tied to the
    ///   composite reference being set.
    /// - `Failed` is valid from any non-terminal status.
    pub fn apply(
        job: &mut Job,
        event: JobEvent,
        now: DateTime<Utc>,
    ) -> Result<Transition, InvalidTransition> {
        let from = job.status;
        let invalid = InvalidTransition {
            from,
            event: event.name(),
        };

        let transition = match (from, event) {
            (JobStatus::Queued, JobEvent::UnitRecorded) => {
                job.status = JobStatus::Processing;
                Transition::Next {
                    from,
                    to: JobStatus::Processing,
                }
            }
            (_, JobEvent::UnitRecorded) => Transition::Unchanged(from),
            (JobStatus::Processing, JobEvent::Assembled { composite, skipped }) => {
                job.status = JobStatus::Completed;
                job.composite = Some(composite);
                job.skipped = skipped;
                job.completed_at = Some(now);
                Transition::Next {
                    from,
                    to: JobStatus::Completed,
                }
            }
            (JobStatus::Queued | JobStatus::Processing, JobEvent::Failed(failure)) => {
                job.status = JobStatus::Failed;
                job.failure = Some(failure);
                job.completed_at = Some(now);
                Transition::Next {
                    from,
                    to: JobStatus::Failed,
                }
            }
            _ => return Err(invalid),
        };

        if transition.applied() {
            job.updated_at = now;
        }
        Ok(transition)
    }
}
