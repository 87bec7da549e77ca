use crate::jobs::{Job, JobStatus};
use crate::jobs::validation::FieldViolation;

/// Errors returned to callers of the job runner.
///
/// Model failures never show up here: they end the job and are reported
/// through `job.failed` and the job snapshot instead.
#[derive(thiserror::Error, Debug)]
pub enum JobError {
    #[error("validation failed: {}", describe(.0))]
    Validation(Vec<FieldViolation>),

    #[error("job not found: {0}")]
    NotFound(String),

    /// Carries the unchanged snapshot so callers can report it back.
    #[error("job {id} already finished ({status})")]
    AlreadyFinished {
        id: String,
        status: JobStatus,
        job: Box<Job>,
    },
}

fn describe(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
