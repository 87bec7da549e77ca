use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::Instrument;
use uuid::Uuid;

use crate::agents::llm::LlmClient;
use crate::agents::{Agent, Role};
use crate::artifacts::{self, RoleOutput};
use crate::jobs::error::JobError;
use crate::jobs::events::{EventPayload, JobEvent};
use crate::jobs::registry::{JobHandle, JobRegistry};
use crate::jobs::validation::validate_request;
use crate::jobs::{GenerationRequest, Job, JobStatus, StageStatus};

pub const CANCELLED_REASON: &str = "cancelled by user";

/// Drives generation jobs through the fixed four-stage pipeline.
///
/// One instance is built by the hosting process and shared behind an `Arc`.
/// Every submitted job runs on its own task; stages inside a job never overlap.
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    agents: Vec<Agent>,
    events_tx: broadcast::Sender<JobEvent>,
    max_requirements_len: usize,
}

impl JobRunner {
    pub fn new(
        registry: Arc<JobRegistry>,
        llm: Option<Arc<dyn LlmClient>>,
        events_tx: broadcast::Sender<JobEvent>,
        max_requirements_len: usize,
    ) -> Self {
        let agents = Role::PIPELINE
            .iter()
            .map(|role| Agent::new(*role, llm.clone()))
            .collect();
        Self {
            registry,
            agents,
            events_tx,
            max_requirements_len,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events_tx.subscribe()
    }

    pub fn max_requirements_len(&self) -> usize {
        self.max_requirements_len
    }

    pub fn is_live(&self) -> bool {
        self.agents.iter().all(Agent::is_live)
    }

    fn emit(&self, job_id: &str, payload: EventPayload) {
        // No subscribers is fine; events are fire-and-forget.
        let _ = self.events_tx.send(JobEvent::new(job_id, payload));
    }

    /// Validate, register and start a job. Returns as soon as the job task is spawned.
    pub async fn submit(self: &Arc<Self>, request: GenerationRequest) -> Result<String, JobError> {
        validate_request(&request, self.max_requirements_len).map_err(JobError::Validation)?;

        let job_id = Uuid::new_v4().to_string();
        let handle = self.registry.insert(Job::new(job_id.clone(), request)).await;

        let span = tracing::info_span!("job", job = %&job_id[..8]);
        tracing::info!(parent: &span, framework = %handle.snapshot().request.framework, "queued");

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            let task = tokio::spawn(Arc::clone(&runner).run(Arc::clone(&handle)).instrument(span));
            if let Err(join_err) = task.await {
                let message = format!("job task panicked: {join_err}");
                tracing::error!(job_id = %handle.id(), error = %message, "✗ Job task died");
                runner.fail(&handle, &message);
            }
        });

        Ok(job_id)
    }

    pub async fn get_status(&self, job_id: &str) -> Result<Job, JobError> {
        self.registry
            .get(job_id)
            .await
            .map(|handle| handle.snapshot())
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Cooperative cancel: the job is marked terminal now, and its task stops
    /// before starting another stage. An in-flight model call is not aborted.
    pub async fn cancel(&self, job_id: &str) -> Result<Job, JobError> {
        let handle = self
            .registry
            .get(job_id)
            .await
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

        let cancelled = handle.update_active(|job| {
            job.status = JobStatus::Cancelled;
            job.error = Some(CANCELLED_REASON.to_string());
            job.completed_at = Some(Utc::now());
            self.emit(
                &job.id,
                EventPayload::JobFailed {
                    error: CANCELLED_REASON.to_string(),
                },
            );
        });

        if !cancelled {
            let job = handle.snapshot();
            return Err(JobError::AlreadyFinished {
                id: job_id.to_string(),
                status: job.status,
                job: Box::new(job),
            });
        }

        tracing::info!(job_id, "job cancelled by user");
        self.registry.schedule_eviction(job_id);
        Ok(handle.snapshot())
    }

    /// Mark a job failed unless it already reached a terminal state.
    fn fail(&self, handle: &JobHandle, message: &str) -> bool {
        let failed = handle.update_active(|job| {
            job.status = JobStatus::Failed;
            job.error = Some(message.to_string());
            job.completed_at = Some(Utc::now());
            self.emit(
                &job.id,
                EventPayload::JobFailed {
                    error: message.to_string(),
                },
            );
        });
        if failed {
            self.registry.schedule_eviction(handle.id());
        }
        failed
    }

    async fn run(self: Arc<Self>, handle: Arc<JobHandle>) {
        let request = handle.snapshot().request;
        let job_start = Instant::now();

        let started = handle.update_active(|job| {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            self.emit(&job.id, EventPayload::JobStarted(job.request.clone()));
        });
        if !started {
            tracing::info!("cancelled before start");
            return;
        }
        tracing::info!(stages = self.agents.len(), "▶ Started");

        let mut context = String::new();
        let mut outputs: Vec<RoleOutput> = Vec::with_capacity(self.agents.len());

        for (index, agent) in self.agents.iter().enumerate() {
            let role = agent.role();

            let entered = handle.update_active(|job| {
                let stage = &mut job.stages[index];
                stage.status = StageStatus::InProgress;
                stage.started_at = Some(Utc::now());
                self.emit(
                    &job.id,
                    EventPayload::StageStarted {
                        role,
                        stage_index: index,
                        description: stage.description.clone(),
                    },
                );
            });
            if !entered {
                tracing::info!(%role, "job no longer active, not starting stage");
                return;
            }

            let stage_start = Instant::now();
            let result = agent
                .execute(&request, &context)
                .instrument(tracing::info_span!("stage", %role))
                .await;
            let duration_ms = stage_start.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    context.push_str(&format!("\n\n{} Output:\n{}", role.title(), output));

                    let record = |job: &mut Job| {
                        let stage = &mut job.stages[index];
                        stage.status = StageStatus::Completed;
                        stage.ended_at = Some(Utc::now());
                        stage.duration_ms = Some(duration_ms);
                        stage.output = Some(output.clone());
                        job.accumulated_context = context.clone();
                        job.overall_progress = job.progress();
                    };
                    let active = handle.update_active(|job| {
                        record(job);
                        self.emit(
                            &job.id,
                            EventPayload::StageCompleted {
                                role,
                                stage_index: index,
                                output: output.clone(),
                                duration_ms,
                            },
                        );
                    });
                    if !active {
                        // Cancelled while the model call was in flight: keep the
                        // finished work in the snapshot, but go no further.
                        handle.update(record);
                        tracing::info!(%role, "stage finished after cancellation, stopping");
                        return;
                    }
                    tracing::info!(%role, duration_ms, "✓ Stage completed");
                    outputs.push(RoleOutput { role, output });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    let record = |job: &mut Job| {
                        let stage = &mut job.stages[index];
                        stage.status = StageStatus::Failed;
                        stage.ended_at = Some(Utc::now());
                        stage.duration_ms = Some(duration_ms);
                        stage.error = Some(err_msg.clone());
                    };
                    let active = handle.update_active(|job| {
                        record(job);
                        self.emit(
                            &job.id,
                            EventPayload::StageFailed {
                                role,
                                stage_index: index,
                                error: err_msg.clone(),
                                duration_ms,
                            },
                        );
                    });
                    if !active {
                        handle.update(record);
                        return;
                    }
                    tracing::error!(%role, error = %err_msg, "✗ Stage failed");
                    let message = format!("{} stage failed: {err_msg}", role.title());
                    if self.fail(&handle, &message) {
                        tracing::error!(
                            elapsed = format_args!("{:.1}s", job_start.elapsed().as_secs_f64()),
                            "✗ Failed"
                        );
                    }
                    return;
                }
            }
        }

        let artifacts = artifacts::assemble(&request, &outputs);
        let duration_ms = job_start.elapsed().as_millis() as u64;
        let completed = handle.update_active(|job| {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            job.overall_progress = 100;
            job.artifacts = Some(artifacts.clone());
            self.emit(
                &job.id,
                EventPayload::JobCompleted {
                    artifacts: artifacts.clone(),
                    outputs: outputs.clone(),
                    duration_ms,
                },
            );
        });

        if completed {
            tracing::info!(
                files = artifacts.len(),
                elapsed = format_args!("{:.1}s", job_start.elapsed().as_secs_f64()),
                "✓ Completed"
            );
            self.registry.schedule_eviction(handle.id());
        }
    }
}
