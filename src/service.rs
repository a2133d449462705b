//! The coordinator: the boundary a request layer talks to.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info};

use crate::assembly::Assembler;
use crate::audio::MAX_PAUSE_MS;
use crate::dispatch::{Dispatcher, UnitMessage};
use crate::error::{BlockvoiceError, Result};
use crate::job::{
    Job, JobFailure, JobId, JobResult, JobSnapshot, JobStatus, StatusReport, UnitInput,
    UnitOutcome, UnitResult,
};
use crate::providers::{SynthesisError, Voice};
use crate::runtime::Runtime;
use crate::store;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResumeReport {
    /// Jobs whose uncounted units were dispatched again.
    pub jobs: Vec<JobId>,
    pub redispatched: usize,
    /// Jobs that only needed the assembly step.
    pub assembled: Vec<JobId>,
}

pub struct Coordinator {
    runtime: Runtime,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Coordinator {
    pub fn new(runtime: Runtime, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            runtime,
            dispatcher,
        }
    }

    /// Validate the blocks, create the job with all of its units, then
    /// dispatch one message per unit. Returns without waiting for any unit.
    pub async fn submit(&self, inputs: Vec<UnitInput>) -> Result<JobId> {
        let inputs = self.validate(inputs)?;
        let (job, units) = Job::with_units(inputs);
        self.runtime.store.create_job(&job, &units).await?;
        info!(job_id = %job.id, unit_count = job.unit_count, "job created");

        for unit in units {
            let message = UnitMessage {
                job_id: job.id.clone(),
                unit_index: unit.index,
                input: unit.input,
            };
            if let Err(e) = self.dispatcher.dispatch(message).await {
                error!(job_id = %job.id, unit_index = unit.index, error = %e, "dispatch failed");
                let failure = JobFailure::new(format!("failed to dispatch unit {}: {e}", unit.index));
                if store::fail_job(self.runtime.store.as_ref(), &job.id, failure.clone())
                    .await?
                    .is_some()
                {
                    self.runtime.hooks.on_job_failed(&job.id, &failure).await;
                }
                return Err(e.into());
            }
        }
        Ok(job.id)
    }

    /// Pick up jobs left live by an earlier process: re-dispatch every unit
    /// not yet counted, and assemble jobs whose units were all counted but
    /// never assembled. Counting is idempotent, so re-dispatching a unit
    /// that is merely slow is harmless.
    pub async fn resume(&self) -> Result<ResumeReport> {
        let mut report = ResumeReport::default();
        let assembler = Assembler::new(self.runtime.clone());

        for job in self.runtime.store.list_jobs().await? {
            if job.status.is_terminal() {
                continue;
            }
            if job.completed_count == job.unit_count {
                info!(job_id = %job.id, "resuming interrupted assembly");
                assembler.assemble(&job.id).await?;
                report.assembled.push(job.id);
                continue;
            }

            let snapshot = self.runtime.store.snapshot(&job.id).await?;
            for unit in snapshot.units.into_iter().filter(|u| !u.counted) {
                self.dispatcher
                    .dispatch(UnitMessage {
                        job_id: job.id.clone(),
                        unit_index: unit.index,
                        input: unit.input,
                    })
                    .await?;
                report.redispatched += 1;
            }
            info!(job_id = %job.id, "job resumed");
            report.jobs.push(job.id);
        }
        Ok(report)
    }

    /// Reject malformed submissions before anything is written. Voices given
    /// by display name are rewritten to their id.
    fn validate(&self, inputs: Vec<UnitInput>) -> Result<Vec<UnitInput>> {
        if inputs.is_empty() {
            return Err(BlockvoiceError::Validation(
                "at least one block is required".into(),
            ));
        }
        let synthesizer = &self.runtime.synthesizer;
        inputs
            .into_iter()
            .enumerate()
            .map(|(index, mut input)| {
                if input.text.trim().is_empty() {
                    return Err(BlockvoiceError::Validation(format!(
                        "block {index}: text must not be empty"
                    )));
                }
                if input.wait_after_ms > MAX_PAUSE_MS {
                    return Err(BlockvoiceError::Validation(format!(
                        "block {index}: wait_after_ms {} exceeds the {MAX_PAUSE_MS}ms limit",
                        input.wait_after_ms
                    )));
                }
                input.voice = synthesizer
                    .resolve_voice(&input.provider, &input.voice)
                    .map_err(|e| {
                        let available = match &e {
                            SynthesisError::UnknownProvider(_) => synthesizer.providers(),
                            _ => synthesizer
                                .voices(&input.provider)
                                .unwrap_or_default()
                                .into_iter()
                                .map(|v| v.voice_id)
                                .collect(),
                        };
                        BlockvoiceError::Validation(format!(
                            "block {index}: {e} (available: {})",
                            available.join(", ")
                        ))
                    })?;
                Ok(input)
            })
            .collect()
    }

    pub async fn get_status(&self, job_id: &str) -> Result<StatusReport> {
        let snapshot = self.runtime.store.snapshot(job_id).await?;
        Ok(StatusReport::from(&snapshot.job))
    }

    pub async fn get_result(&self, job_id: &str) -> Result<JobResult> {
        let snapshot = self.completed(job_id).await?;
        let units = snapshot
            .units
            .iter()
            .map(|unit| match &unit.outcome {
                UnitOutcome::Succeeded { artifact } => UnitResult {
                    index: unit.index,
                    artifact: Some(artifact.stored.clone()),
                    duration_ms: Some(artifact.duration_ms),
                },
                _ => UnitResult {
                    index: unit.index,
                    artifact: None,
                    duration_ms: None,
                },
            })
            .collect();
        let job = snapshot.job;
        let composite = job
            .composite
            .ok_or(BlockvoiceError::NotReady { status: job.status })?;
        Ok(JobResult {
            job_id: job.id,
            composite,
            units,
            skipped: job.skipped,
        })
    }

    /// Audio of one unit of a completed job: the local copy if it is still
    /// in the working area, otherwise the durable one.
    pub async fn unit_audio(&self, job_id: &str, index: usize) -> Result<Vec<u8>> {
        let snapshot = self.completed(job_id).await?;
        let unit = snapshot.unit(index).ok_or_else(|| {
            BlockvoiceError::from(store::StoreError::UnitNotFound {
                job_id: job_id.to_string(),
                index,
            })
        })?;
        let UnitOutcome::Succeeded { artifact } = &unit.outcome else {
            return Err(BlockvoiceError::NoAudio { index });
        };
        if let Some(path) = &artifact.local_path
            && let Ok(bytes) = self.runtime.workspace.read(path).await
        {
            return Ok(bytes);
        }
        Ok(self.runtime.storage.fetch(&artifact.stored).await?)
    }

    pub async fn composite_audio(&self, job_id: &str) -> Result<Vec<u8>> {
        let snapshot = self.completed(job_id).await?;
        if let Ok(bytes) = self
            .runtime
            .workspace
            .read(&self.runtime.workspace.composite_path(job_id))
            .await
        {
            return Ok(bytes);
        }
        let composite = snapshot.job.composite.ok_or(BlockvoiceError::NotReady {
            status: snapshot.job.status,
        })?;
        Ok(self.runtime.storage.fetch(&composite).await?)
    }

    pub fn list_providers(&self) -> Vec<String> {
        self.runtime.synthesizer.providers()
    }

    pub fn list_voices(&self, provider: &str) -> Result<Vec<Voice>> {
        self.runtime
            .synthesizer
            .voices(provider)
            .ok_or_else(|| SynthesisError::UnknownProvider(provider.to_string()).into())
    }

    /// Poll until the job is terminal, reporting each observed status.
    pub async fn wait(
        &self,
        job_id: &str,
        poll: Duration,
        mut on_status: impl FnMut(&StatusReport),
    ) -> Result<StatusReport> {
        loop {
            let status = self.get_status(job_id).await?;
            on_status(&status);
            if status.status.is_terminal() {
                return Ok(status);
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn completed(&self, job_id: &str) -> Result<JobSnapshot> {
        let snapshot = self.runtime.store.snapshot(job_id).await?;
        match snapshot.job.status {
            JobStatus::Completed => Ok(snapshot),
            JobStatus::Failed => Err(BlockvoiceError::JobFailed {
                failure: snapshot
                    .job
                    .failure
                    .unwrap_or_else(|| JobFailure::new("unknown failure")),
            }),
            status => Err(BlockvoiceError::NotReady { status }),
        }
    }
}
