use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque job identifier, generated at submission.
pub type JobId = String;

/// Tracks the lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `Completed` and `Failed` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

fn default_provider() -> String {
    "elevenlabs".to_string()
}

fn default_voice() -> String {
    "default".to_string()
}

/// The work payload of one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInput {
    pub text: String,
    /// Silence inserted after this block in the composite.
    #[serde(default)]
    pub wait_after_ms: u64,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Run the text through the diacritizer before synthesis.
    #[serde(default)]
    pub diacritize: bool,
}

impl UnitInput {
    pub fn new(text: impl Into<String>, provider: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            wait_after_ms: 0,
            provider: provider.into(),
            voice: voice.into(),
            diacritize: false,
        }
    }

    pub fn with_pause(mut self, wait_after_ms: u64) -> Self {
        self.wait_after_ms = wait_after_ms;
        self
    }
}

/// Where a persisted artifact lives: the primary store and, when mirroring
/// is enabled, a secondary copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub primary: String,
    #[serde(default)]
    pub mirror: Option<String>,
}

/// Output of a successfully processed unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitArtifact {
    /// Copy in the local working area; purged after the retention window.
    pub local_path: Option<PathBuf>,
    pub stored: ArtifactRef,
    pub duration_ms: u64,
}

/// Which collaborator a unit failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Normalization,
    Synthesis,
    Storage,
    Audio,
    Timeout,
    Consistency,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Normalization => write!(f, "normalization"),
            FailureKind::Synthesis => write!(f, "synthesis"),
            FailureKind::Storage => write!(f, "storage"),
            FailureKind::Audio => write!(f, "audio"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Consistency => write!(f, "consistency"),
        }
    }
}

/// Why a particular unit did not produce audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub index: usize,
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit {} {} failure: {}", self.index, self.kind, self.message)
    }
}

/// The only mutable field of a unit, written exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitOutcome {
    Pending,
    Succeeded { artifact: UnitArtifact },
    Failed { failure: UnitFailure },
}

impl UnitOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, UnitOutcome::Pending)
    }
}

/// One block of a job, with a fixed position in the composite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub index: usize,
    pub input: UnitInput,
    pub outcome: UnitOutcome,
    /// Set together with the job's counter increment, so a unit
    /// contributes to `completed_count` at most once.
    #[serde(default)]
    pub counted: bool,
}

impl Unit {
    pub fn pending(index: usize, input: UnitInput) -> Self {
        Self {
            index,
            input,
            outcome: UnitOutcome::Pending,
            counted: false,
        }
    }
}

/// Job-level failure record: a reason plus the units that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub reason: String,
    #[serde(default)]
    pub units: Vec<UnitFailure>,
}

impl JobFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            units: Vec::new(),
        }
    }

    pub fn with_units(mut self, units: Vec<UnitFailure>) -> Self {
        self.units = units;
        self
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        for unit in &self.units {
            write!(f, "; {unit}")?;
        }
        Ok(())
    }
}

/// A client-submitted request tracked to a single composite result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub unit_count: usize,
    pub status: JobStatus,
    pub completed_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub composite: Option<ArtifactRef>,
    /// Set when the job ends in `Failed`.
    pub failure: Option<JobFailure>,
    /// Units left out of a composite assembled from a partial result.
    #[serde(default)]
    pub skipped: Vec<UnitFailure>,
}

impl Job {
    pub fn new(unit_count: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            unit_count,
            status: JobStatus::Queued,
            completed_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            composite: None,
            failure: None,
            skipped: Vec::new(),
        }
    }

    /// Builds the job record and its pending units for a submission.
    pub fn with_units(inputs: Vec<UnitInput>) -> (Self, Vec<Unit>) {
        let job = Self::new(inputs.len());
        let units = inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| Unit::pending(index, input))
            .collect();
        (job, units)
    }

    pub fn progress(&self) -> String {
        format!("{}/{}", self.completed_count, self.unit_count)
    }
}

/// Consistent point-in-time view of a job and all of its units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job: Job,
    pub units: Vec<Unit>,
}

impl JobSnapshot {
    pub fn failed_units(&self) -> Vec<UnitFailure> {
        self.units
            .iter()
            .filter_map(|unit| match &unit.outcome {
                UnitOutcome::Failed { failure } => Some(failure.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn unit(&self, index: usize) -> Option<&Unit> {
        self.units.get(index)
    }
}

/// What `get_status` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub completed_count: usize,
    pub unit_count: usize,
    pub progress: String,
    pub composite: Option<ArtifactRef>,
    pub failure: Option<JobFailure>,
}

impl From<&Job> for StatusReport {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            completed_count: job.completed_count,
            unit_count: job.unit_count,
            progress: job.progress(),
            composite: job.composite.clone(),
            failure: job.failure.clone(),
        }
    }
}

/// Per-unit entry of a job result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitResult {
    pub index: usize,
    pub artifact: Option<ArtifactRef>,
    pub duration_ms: Option<u64>,
}

/// What `get_result` returns for a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub composite: ArtifactRef,
    pub units: Vec<UnitResult>,
    pub skipped: Vec<UnitFailure>,
}
