//! Periodic reconciliation: fail jobs that outlived their budget and purge
//! old files from the working area.
//!
//! Nothing here is needed for correct assembly. A missed sweep only delays
//! timeouts and disk reclamation.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::job::{FailureKind, JobFailure, JobStatus, UnitFailure};
use crate::runtime::Runtime;
use crate::store;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Jobs moved to `failed` by this pass.
    pub timed_out: Vec<String>,
    pub purged: usize,
    /// Old files kept because their job is still running.
    pub retained: usize,
    pub errors: usize,
}

pub struct LifecycleManager {
    runtime: Runtime,
}

impl LifecycleManager {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// One pass as if the current time were `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let jobs = self.runtime.store.list_jobs().await?;
        let job_timeout = self.runtime.settings.job_timeout;

        let mut statuses: HashMap<String, JobStatus> = HashMap::with_capacity(jobs.len());
        for job in jobs {
            let age = (now - job.created_at).to_std().unwrap_or_default();
            let status = if !job.status.is_terminal() && age > job_timeout {
                match self.expire(&job.id, age).await {
                    Ok(status) => {
                        if status == JobStatus::Failed {
                            report.timed_out.push(job.id.clone());
                        }
                        status
                    }
                    Err(e) => {
                        error!(job_id = %job.id, error = %e, "failed to expire job");
                        report.errors += 1;
                        job.status
                    }
                }
            } else {
                job.status
            };
            statuses.insert(job.id, status);
        }

        self.purge(SystemTime::from(now), &statuses, &mut report).await;

        info!(
            timed_out = report.timed_out.len(),
            purged = report.purged,
            retained = report.retained,
            errors = report.errors,
            "sweep finished"
        );
        Ok(report)
    }

    /// Force a stuck job to `failed`, naming the units that never reported.
    async fn expire(&self, job_id: &str, age: Duration) -> Result<JobStatus> {
        let snapshot = self.runtime.store.snapshot(job_id).await?;
        let missing = snapshot
            .units
            .iter()
            .filter(|u| u.outcome.is_pending())
            .map(|u| UnitFailure {
                index: u.index,
                kind: FailureKind::Timeout,
                message: "no outcome recorded".into(),
            })
            .collect();
        let failure = JobFailure::new(format!(
            "job timed out after {}s with {} of {} units accounted for",
            age.as_secs(),
            snapshot.job.completed_count,
            snapshot.job.unit_count
        ))
        .with_units(missing);

        match store::fail_job(self.runtime.store.as_ref(), job_id, failure.clone()).await? {
            Some(from) => {
                warn!(job_id, from = %from, "job timed out");
                self.runtime.hooks.on_job_failed(job_id, &failure).await;
                Ok(JobStatus::Failed)
            }
            // Finished on its own in the meantime.
            None => Ok(self.runtime.store.snapshot(job_id).await?.job.status),
        }
    }

    async fn purge(
        &self,
        now: SystemTime,
        statuses: &HashMap<String, JobStatus>,
        report: &mut SweepReport,
    ) {
        let retention = self.runtime.settings.retention;
        let workspace = &self.runtime.workspace;
        let entries = match workspace.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                error!(root = %workspace.root().display(), error = %e, "failed to list working area");
                report.errors += 1;
                return;
            }
        };

        for entry in entries {
            let age = now.duration_since(entry.modified).unwrap_or_default();
            if age <= retention {
                continue;
            }
            let owner_live = entry
                .job_id
                .as_ref()
                .and_then(|id| statuses.get(id))
                .is_some_and(|status| !status.is_terminal());
            if owner_live {
                report.retained += 1;
                continue;
            }
            match workspace.remove(&entry.path).await {
                Ok(()) => {
                    debug!(path = %entry.path.display(), "purged");
                    report.purged += 1;
                }
                Err(e) => {
                    error!(path = %entry.path.display(), error = %e, "failed to delete file");
                    report.errors += 1;
                }
            }
        }
    }

    /// Sweep every `interval` (at least one millisecond) until shutdown is signalled.
    pub async fn run(self, interval: Duration, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval.max(MIN_SWEEP_INTERVAL));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("lifecycle manager stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::UnitMessage;
    use crate::executor::UnitExecutor;
    use crate::job::Job;
    use crate::runtime::Settings;
    use crate::runtime::testing::{Harness, input};

    async fn submit(h: &Harness, texts: &[&str]) -> (Job, Vec<UnitMessage>) {
        let (job, units) = Job::with_units(texts.iter().map(|t| input(t)).collect());
        h.runtime.store.create_job(&job, &units).await.unwrap();
        let messages = units
            .into_iter()
            .map(|u| UnitMessage {
                job_id: job.id.clone(),
                unit_index: u.index,
                input: u.input,
            })
            .collect();
        (job, messages)
    }

    #[tokio::test]
    async fn undelivered_unit_times_out_job() {
        let h = Harness::new();
        let (stuck, messages) = submit(&h, &["tone:1:8", "tone:2:8"]).await;
        UnitExecutor::new(h.runtime.clone())
            .process(&messages[0])
            .await
            .unwrap();
        let manager = LifecycleManager::new(h.runtime.clone());

        // Within budget: nothing happens.
        let report = manager.sweep_at(Utc::now()).await.unwrap();
        assert!(report.timed_out.is_empty());

        let later = Utc::now() + chrono::Duration::seconds(1801);
        let (mut fresh, fresh_units) = Job::with_units(vec![input("tone:3:8")]);
        fresh.created_at = later;
        h.runtime.store.create_job(&fresh, &fresh_units).await.unwrap();

        let report = manager.sweep_at(later).await.unwrap();
        assert_eq!(report.timed_out, vec![stuck.id.clone()]);

        let snap = h.runtime.store.snapshot(&stuck.id).await.unwrap();
        assert_eq!(snap.job.status, JobStatus::Failed);
        let failure = snap.job.failure.unwrap();
        assert_eq!(failure.units.len(), 1);
        assert_eq!(failure.units[0].index, 1);
        assert_eq!(failure.units[0].kind, FailureKind::Timeout);
        assert!(h.hooks.events().contains(&format!("job_failed {}", stuck.id)));

        let fresh = h.runtime.store.snapshot(&fresh.id).await.unwrap();
        assert_eq!(fresh.job.status, JobStatus::Queued);

        // A late unit for a timed-out job is recorded but changes nothing.
        UnitExecutor::new(h.runtime.clone())
            .process(&messages[1])
            .await
            .unwrap();
        let snap = h.runtime.store.snapshot(&stuck.id).await.unwrap();
        assert_eq!(snap.job.status, JobStatus::Failed);
        assert!(snap.job.composite.is_none());
    }

    #[tokio::test]
    async fn purge_keeps_files_of_running_jobs() {
        let h = Harness::with_settings(Settings {
            job_timeout: Duration::from_secs(100 * 3600),
            ..Settings::default()
        });
        let (done, done_messages) = submit(&h, &["tone:1:8"]).await;
        let (running, running_messages) = submit(&h, &["tone:1:8", "tone:2:8"]).await;
        let executor = UnitExecutor::new(h.runtime.clone());
        executor.process(&done_messages[0]).await.unwrap();
        executor.process(&running_messages[0]).await.unwrap();

        let ws = &h.runtime.workspace;
        ws.write(&ws.root().join("orphan_block0.wav"), b"x").await.unwrap();
        assert!(ws.composite_path(&done.id).exists());

        let manager = LifecycleManager::new(h.runtime.clone());
        let report = manager.sweep_at(Utc::now()).await.unwrap();
        assert_eq!(report.purged, 0, "nothing is old yet");

        let report = manager
            .sweep_at(Utc::now() + chrono::Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(report.purged, 3);
        assert_eq!(report.retained, 1);
        assert!(!ws.unit_path(&done.id, 0).exists());
        assert!(!ws.composite_path(&done.id).exists());
        assert!(ws.unit_path(&running.id, 0).exists());
        assert!(report.timed_out.is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let h = Harness::new();
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(LifecycleManager::new(h.runtime.clone()).run(Duration::from_millis(5), rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn zero_interval_does_not_panic() {
        let h = Harness::new();
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(LifecycleManager::new(h.runtime.clone()).run(Duration::ZERO, rx));
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
