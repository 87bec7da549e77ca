use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agents::Role;
use crate::artifacts::{ArtifactMap, RoleOutput};
use crate::jobs::GenerationRequest;

/// One job lifecycle event as relayed to real-time clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub event_type: JobEventType,
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl JobEvent {
    pub fn new(job_id: &str, payload: EventPayload) -> Self {
        Self {
            event_type: payload.event_type(),
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobEventType {
    #[serde(rename = "job.started")]
    JobStarted,
    #[serde(rename = "stage.started")]
    StageStarted,
    #[serde(rename = "stage.completed")]
    StageCompleted,
    #[serde(rename = "stage.failed")]
    StageFailed,
    #[serde(rename = "job.completed")]
    JobCompleted,
    #[serde(rename = "job.failed")]
    JobFailed,
}

impl JobEventType {
    pub fn as_event_name(self) -> &'static str {
        match self {
            JobEventType::JobStarted => "job.started",
            JobEventType::StageStarted => "stage.started",
            JobEventType::StageCompleted => "stage.completed",
            JobEventType::StageFailed => "stage.failed",
            JobEventType::JobCompleted => "job.completed",
            JobEventType::JobFailed => "job.failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobEventType::JobCompleted | JobEventType::JobFailed)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum EventPayload {
    /// The submission, echoed back.
    JobStarted(GenerationRequest),
    StageStarted {
        role: Role,
        stage_index: usize,
        description: String,
    },
    StageCompleted {
        role: Role,
        stage_index: usize,
        output: String,
        duration_ms: u64,
    },
    StageFailed {
        role: Role,
        stage_index: usize,
        error: String,
        duration_ms: u64,
    },
    JobCompleted {
        artifacts: ArtifactMap,
        outputs: Vec<RoleOutput>,
        duration_ms: u64,
    },
    JobFailed {
        error: String,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> JobEventType {
        match self {
            EventPayload::JobStarted(_) => JobEventType::JobStarted,
            EventPayload::StageStarted { .. } => JobEventType::StageStarted,
            EventPayload::StageCompleted { .. } => JobEventType::StageCompleted,
            EventPayload::StageFailed { .. } => JobEventType::StageFailed,
            EventPayload::JobCompleted { .. } => JobEventType::JobCompleted,
            EventPayload::JobFailed { .. } => JobEventType::JobFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_started_echoes_request() {
        let request = GenerationRequest {
            requirements: "Build a todo app".into(),
            framework: "react".into(),
            language: "python".into(),
        };
        let event = JobEvent::new("j1", EventPayload::JobStarted(request));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "job.started");
        assert_eq!(value["jobId"], "j1");
        assert!(value["timestamp"].is_string());
        assert_eq!(value["payload"]["requirements"], "Build a todo app");
        assert_eq!(value["payload"]["language"], "python");
    }

    #[test]
    fn test_stage_completed_payload_fields() {
        let event = JobEvent::new(
            "j1",
            EventPayload::StageCompleted {
                role: Role::Implementer,
                stage_index: 2,
                output: "code".into(),
                duration_ms: 1500,
            },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "stage.completed");
        assert_eq!(value["payload"]["role"], "implementer");
        assert_eq!(value["payload"]["stageIndex"], 2);
        assert_eq!(value["payload"]["durationMs"], 1500);
        assert_eq!(value["payload"]["output"], "code");
    }

    #[test]
    fn test_event_type_follows_payload() {
        let event = JobEvent::new(
            "j1",
            EventPayload::JobFailed {
                error: "boom".into(),
            },
        );
        assert_eq!(event.event_type, JobEventType::JobFailed);
        assert!(event.event_type.is_terminal());
        assert_eq!(event.event_type.as_event_name(), "job.failed");
    }

    #[test]
    fn test_event_names_match_serialization() {
        for ty in [
            JobEventType::JobStarted,
            JobEventType::StageStarted,
            JobEventType::StageCompleted,
            JobEventType::StageFailed,
            JobEventType::JobCompleted,
            JobEventType::JobFailed,
        ] {
            assert_eq!(
                serde_json::to_string(&ty).unwrap(),
                format!("\"{}\"", ty.as_event_name())
            );
        }
    }
}
