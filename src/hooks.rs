//! Callbacks fired as blocks and jobs finish.
//!
//! Hooks are notifications only: they run after the state change is durable
//! and cannot fail or alter it.

use async_trait::async_trait;
use tracing::{error, info};

use crate::job::{ArtifactRef, JobFailure, UnitArtifact, UnitFailure};

#[async_trait]
pub trait JobHooks: Send + Sync {
    async fn on_block_completed(&self, _job_id: &str, _index: usize, _artifact: &UnitArtifact) {}

    async fn on_block_failed(&self, _job_id: &str, _failure: &UnitFailure) {}

    async fn on_job_completed(&self, _job_id: &str, _composite: &ArtifactRef, _duration_ms: u64) {}

    async fn on_job_failed(&self, _job_id: &str, _failure: &JobFailure) {}
}

/// Hooks that only write log lines.
pub struct LoggingHooks;

#[async_trait]
impl JobHooks for LoggingHooks {
    async fn on_block_completed(&self, job_id: &str, index: usize, artifact: &UnitArtifact) {
        info!(
            job_id,
            unit_index = index,
            uri = %artifact.stored.primary,
            duration_ms = artifact.duration_ms,
            "block completed"
        );
    }

    async fn on_block_failed(&self, job_id: &str, failure: &UnitFailure) {
        error!(job_id, unit_index = failure.index, kind = %failure.kind, error = %failure.message, "block failed");
    }

    async fn on_job_completed(&self, job_id: &str, composite: &ArtifactRef, duration_ms: u64) {
        info!(job_id, uri = %composite.primary, duration_ms, "job completed");
    }

    async fn on_job_failed(&self, job_id: &str, failure: &JobFailure) {
        error!(job_id, error = %failure, "job failed");
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FailureKind;

    struct Silent;

    #[async_trait]
    impl JobHooks for Silent {}

    #[tokio::test]
    async fn default_hooks_do_nothing() {
        let hooks: &dyn JobHooks = &Silent;
        hooks
            .on_block_failed(
                "j1",
                &UnitFailure {
                    index: 0,
                    kind: FailureKind::Synthesis,
                    message: "boom".into(),
                },
            )
            .await;
        hooks.on_job_failed("j1", &JobFailure::new("timeout")).await;
    }

    #[tokio::test]
    async fn recording_hooks_capture_order() {
        let hooks = testing::RecordingHooks::default();
        hooks.on_job_failed("j1", &JobFailure::new("x")).await;
        hooks
            .on_job_completed(
                "j2",
                &ArtifactRef {
                    primary: "local:j2/final.wav".into(),
                    mirror: None,
                },
                10,
            )
            .await;
        assert_eq!(hooks.events(), vec!["job_failed j1", "job_completed j2"]);
    }
}
