pub mod error;
pub mod events;
pub mod registry;
pub mod runner;
pub mod validation;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::Role;
use crate::artifacts::ArtifactMap;

/// What the client asked for. Immutable once a job is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(default)]
    pub requirements: String,
    #[serde(default)]
    pub framework: String,
    #[serde(default)]
    pub language: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub role: Role,
    pub status: StageStatus,
    pub description: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Stage {
    fn pending(role: Role, request: &GenerationRequest) -> Self {
        Self {
            role,
            status: StageStatus::Pending,
            description: role.task_description(request),
            started_at: None,
            ended_at: None,
            duration_ms: None,
            output: None,
            error: None,
        }
    }
}

/// Snapshot of one generation job. This is also the status-query view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub request: GenerationRequest,
    pub status: JobStatus,
    pub stages: Vec<Stage>,
    pub overall_progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Completed stage outputs in completion order; fed to every later stage.
    #[serde(skip)]
    pub accumulated_context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ArtifactMap>,
}

impl Job {
    pub fn new(id: String, request: GenerationRequest) -> Self {
        let stages = Role::PIPELINE
            .iter()
            .map(|role| Stage::pending(*role, &request))
            .collect();
        Self {
            id,
            request,
            status: JobStatus::Queued,
            stages,
            overall_progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            accumulated_context: String::new(),
            error: None,
            artifacts: None,
        }
    }

    pub fn completed_stages(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Completed)
            .count()
    }

    /// `completed / total * 100`, pinned to 100 once the job completed.
    pub fn progress(&self) -> u8 {
        if self.status == JobStatus::Completed || self.stages.is_empty() {
            return 100;
        }
        (self.completed_stages() * 100 / self.stages.len()) as u8
    }

    pub fn current_stage(&self) -> Option<&Stage> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::InProgress)
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            status: self.status,
            overall_progress: self.overall_progress,
            current_stage: self.current_stage().map(|s| s.role),
            framework: self.request.framework.clone(),
            language: self.request.language.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: String,
    pub status: JobStatus,
    pub overall_progress: u8,
    pub current_stage: Option<Role>,
    pub framework: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
