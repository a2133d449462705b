use thiserror::Error;

use crate::audio::AudioError;
use crate::dispatch::DispatchError;
use crate::job::{JobFailure, JobStatus};
use crate::normalize::NormalizationError;
use crate::providers::SynthesisError;
use crate::storage::StorageError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum BlockvoiceError {
    #[error("invalid submission: {0}")]
    Validation(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("normalization error: {0}")]
    Normalization(#[from] NormalizationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("job {job_id}: completed count {observed} exceeds unit count {unit_count}")]
    Consistency {
        job_id: String,
        observed: usize,
        unit_count: usize,
    },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("job is not completed yet (status: {status})")]
    NotReady { status: JobStatus },

    #[error("job failed: {failure}")]
    JobFailed { failure: JobFailure },

    #[error("unit {index} produced no audio")]
    NoAudio { index: usize },

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("audio error: {0}")]
    Audio(#[from] AudioError),
}

impl BlockvoiceError {
    /// Errors worth redelivering the message for. Everything else is either
    /// already recorded as a unit failure or will fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(self, BlockvoiceError::StoreUnavailable(_))
    }
}

impl From<StoreError> for BlockvoiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => BlockvoiceError::StoreUnavailable(msg),
            StoreError::JobNotFound(id) => BlockvoiceError::JobNotFound(id),
            other => BlockvoiceError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, BlockvoiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_crate_kinds() {
        let err: BlockvoiceError = StoreError::Unavailable("disk gone".into()).into();
        assert!(matches!(err, BlockvoiceError::StoreUnavailable(_)));
        assert!(err.is_transient());

        let err: BlockvoiceError = StoreError::JobNotFound("j1".into()).into();
        assert!(matches!(err, BlockvoiceError::JobNotFound(ref id) if id == "j1"));
        assert!(!err.is_transient());

        let err: BlockvoiceError = StoreError::Corrupt("bad json".into()).into();
        assert!(matches!(err, BlockvoiceError::Store(StoreError::Corrupt(_))));
    }

    #[test]
    fn consistency_display() {
        let err = BlockvoiceError::Consistency {
            job_id: "j1".into(),
            observed: 4,
            unit_count: 3,
        };
        assert_eq!(
            err.to_string(),
            "job j1: completed count 4 exceeds unit count 3"
        );
    }
}
