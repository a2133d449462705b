mod model;
mod state;

pub use model::{
    ArtifactRef, FailureKind, Job, JobFailure, JobId, JobResult, JobSnapshot, JobStatus,
    StatusReport, Unit, UnitArtifact, UnitFailure, UnitInput, UnitOutcome, UnitResult,
};
pub use state::{InvalidTransition, JobEvent, StateMachine, Transition};
