//! Unit executor and the worker pool that feeds it.
//!
//! One [`UnitExecutor::process`] call handles one delivered message end to end:
//! produce the audio, record the outcome, count the unit, and run the
//! assembly step if this call crossed the job's barrier.

use std::sync::Arc;

use tokio::sync::{Semaphore, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::assembly::{Assembler, AssemblyOutcome};
use crate::audio;
use crate::dispatch::{QueueReceiver, UnitMessage};
use crate::error::{BlockvoiceError, Result};
use crate::fan_in::FanIn;
use crate::job::{
    FailureKind, JobEvent, JobFailure, JobStatus, UnitArtifact, UnitFailure, UnitOutcome,
};
use crate::normalize::NormalizationError;
use crate::providers::SynthesisRequest;
use crate::runtime::Runtime;
use crate::store::{self, OutcomeWrite};

/// What one `process` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// False when an earlier delivery had already written the outcome.
    pub recorded: bool,
    pub outcome: UnitOutcome,
    pub fan_in: FanIn,
    /// Set only on the call that ran the assembly step.
    pub assembly: Option<AssemblyOutcome>,
}

pub struct UnitExecutor {
    runtime: Runtime,
    assembler: Assembler,
}

impl UnitExecutor {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            assembler: Assembler::new(runtime.clone()),
            runtime,
        }
    }

    pub async fn process(&self, message: &UnitMessage) -> Result<ExecutionReport> {
        let job_id = message.job_id.as_str();
        let index = message.unit_index;
        let store = &self.runtime.store;

        let unit = store.unit(job_id, index).await?;
        let (recorded, outcome) = if unit.outcome.is_pending() {
            let produced = self.produce(message).await;
            match store.record_outcome(job_id, index, produced.clone()).await? {
                OutcomeWrite::Recorded => {
                    self.notify_unit(job_id, index, &produced).await;
                    (true, produced)
                }
                OutcomeWrite::AlreadyRecorded(existing) => {
                    warn!(job_id, unit_index = index, "concurrent delivery already recorded this unit");
                    (false, existing)
                }
            }
        } else {
            warn!(job_id, unit_index = index, "redelivered unit, outcome already recorded");
            (false, unit.outcome)
        };

        // Only the first outcome moves the job out of `queued`.
        store
            .transition(job_id, JobStatus::Queued, JobEvent::UnitRecorded)
            .await?;

        let tick = store.increment_completed(job_id, index).await?;
        let fan_in = FanIn::decide(&tick);
        let assembly = match fan_in {
            FanIn::Wait { remaining } => {
                debug!(job_id, unit_index = index, completed = tick.completed_count, remaining, "unit counted");
                None
            }
            // The delivery that crossed the barrier may have died before the
            // job left `processing`; the assembler no-ops if it already has.
            FanIn::AlreadyCounted if tick.completed_count == tick.unit_count => {
                warn!(job_id, unit_index = index, "duplicate delivery after barrier, re-checking assembly");
                Some(self.assembler.assemble(job_id).await?)
            }
            FanIn::AlreadyCounted => {
                warn!(job_id, unit_index = index, "duplicate delivery, unit already counted");
                None
            }
            FanIn::Assemble => {
                info!(job_id, unit_index = index, unit_count = tick.unit_count, "all units accounted for, assembling");
                Some(self.assembler.assemble(job_id).await?)
            }
            FanIn::Overflow {
                observed,
                unit_count,
            } => {
                error!(job_id, observed, unit_count, "completed count exceeded unit count");
                let failure = JobFailure::new(format!(
                    "consistency error: completed count {observed} exceeds unit count {unit_count}"
                ))
                .with_units(vec![UnitFailure {
                    index,
                    kind: FailureKind::Consistency,
                    message: "counted past the number of units".into(),
                }]);
                if store::fail_job(store.as_ref(), job_id, failure.clone())
                    .await?
                    .is_some()
                {
                    self.runtime.hooks.on_job_failed(job_id, &failure).await;
                }
                return Err(BlockvoiceError::Consistency {
                    job_id: job_id.to_string(),
                    observed,
                    unit_count,
                });
            }
        };

        Ok(ExecutionReport {
            recorded,
            outcome,
            fan_in,
            assembly,
        })
    }

    async fn produce(&self, message: &UnitMessage) -> UnitOutcome {
        match self.try_produce(message).await {
            Ok(artifact) => UnitOutcome::Succeeded { artifact },
            Err(failure) => UnitOutcome::Failed { failure },
        }
    }

    async fn try_produce(&self, message: &UnitMessage) -> std::result::Result<UnitArtifact, UnitFailure> {
        let job_id = message.job_id.as_str();
        let index = message.unit_index;
        let input = &message.input;
        let fail = |kind: FailureKind, message: String| UnitFailure {
            index,
            kind,
            message,
        };

        let text = if input.diacritize {
            let normalizer = self.runtime.normalizer.as_ref().ok_or_else(|| {
                fail(
                    FailureKind::Normalization,
                    NormalizationError::NotConfigured.to_string(),
                )
            })?;
            normalizer
                .normalize(&input.text)
                .await
                .map_err(|e| fail(FailureKind::Normalization, e.to_string()))?
        } else {
            input.text.clone()
        };

        let request = SynthesisRequest {
            provider: input.provider.clone(),
            voice: input.voice.clone(),
            text,
        };
        let limit = self.runtime.settings.synthesis_timeout;
        let wav = match timeout(limit, self.runtime.synthesizer.synthesize(&request)).await {
            Ok(Ok(wav)) => wav,
            Ok(Err(e)) => return Err(fail(FailureKind::Synthesis, e.to_string())),
            Err(_) => {
                return Err(fail(
                    FailureKind::Timeout,
                    format!("synthesis did not finish within {}ms", limit.as_millis()),
                ));
            }
        };
        let duration_ms =
            audio::duration_ms(&wav).map_err(|e| fail(FailureKind::Audio, e.to_string()))?;

        let workspace = &self.runtime.workspace;
        let local_path = workspace.unit_path(job_id, index);
        workspace
            .write(&local_path, &wav)
            .await
            .map_err(|e| fail(FailureKind::Storage, format!("working area: {e}")))?;
        let stored = self
            .runtime
            .storage
            .store(&format!("{job_id}/block{index}.wav"), &wav)
            .await
            .map_err(|e| fail(FailureKind::Storage, e.to_string()))?;

        Ok(UnitArtifact {
            local_path: Some(local_path),
            stored,
            duration_ms,
        })
    }

    async fn notify_unit(&self, job_id: &str, index: usize, outcome: &UnitOutcome) {
        let hooks = &self.runtime.hooks;
        match outcome {
            UnitOutcome::Succeeded { artifact } => {
                hooks.on_block_completed(job_id, index, artifact).await
            }
            UnitOutcome::Failed { failure } => hooks.on_block_failed(job_id, failure).await,
            UnitOutcome::Pending => {}
        }
    }
}

/// Drains the dispatch queue with up to `workers` units in flight.
pub struct WorkerPool {
    executor: Arc<UnitExecutor>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(executor: Arc<UnitExecutor>, workers: usize) -> Self {
        Self {
            executor,
            workers: workers.max(1),
        }
    }

    /// Run until shutdown is signalled or the queue closes, then wait for
    /// in-flight units and flush the store.
    pub async fn run(self, mut queue: QueueReceiver, mut shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        info!(workers = self.workers, "worker pool started");

        loop {
            let delivery = tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("worker pool shutting down");
                    break;
                }
                delivery = queue.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let executor = self.executor.clone();
            tokio::spawn(async move {
                let job_id = delivery.message.job_id.clone();
                let unit_index = delivery.message.unit_index;
                match executor.process(&delivery.message).await {
                    Ok(_) => delivery.ack(),
                    Err(e) if e.is_transient() => {
                        warn!(job_id = %job_id, unit_index, attempt = delivery.attempt, error = %e, "unit processing failed, requeueing");
                        delivery.nack();
                    }
                    Err(e) => {
                        error!(job_id = %job_id, unit_index, error = %e, "unit processing failed");
                        delivery.ack();
                    }
                }
                drop(permit);
            });
        }

        // Every permit back means nothing is in flight.
        let _all = semaphore.acquire_many(self.workers as u32).await;
        self.executor.runtime.store.flush().await?;
        Ok(())
    }
}
