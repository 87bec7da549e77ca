use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, watch};

use crate::jobs::Job;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Publishes snapshots of one job. Only the job's own task writes stage
/// state; `cancel` may flip a non-terminal job to `cancelled`.
pub struct JobHandle {
    id: String,
    state: watch::Sender<Job>,
}

impl JobHandle {
    fn new(job: Job) -> Self {
        let (state, _) = watch::channel(job);
        let id = state.borrow().id.clone();
        Self { id, state }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> Job {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Job> {
        self.state.subscribe()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.borrow().status.is_terminal()
    }

    /// Mutate the job unconditionally.
    pub fn update(&self, f: impl FnOnce(&mut Job)) {
        self.state.send_modify(f);
    }

    /// Mutate the job only while it is not terminal. Returns whether `f` ran.
    ///
    /// The check and the mutation happen under the same lock, so the first
    /// terminal transition wins and later ones are rejected.
    pub fn update_active(&self, f: impl FnOnce(&mut Job)) -> bool {
        self.state.send_if_modified(|job| {
            if job.status.is_terminal() {
                false
            } else {
                f(job);
                true
            }
        })
    }
}

/// In-memory job table. Entries live until they have been terminal for
/// longer than the retention window.
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<JobHandle>>>,
    retention: Duration,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub async fn insert(&self, job: Job) -> Arc<JobHandle> {
        let handle = Arc::new(JobHandle::new(job));
        self.jobs
            .write()
            .await
            .insert(handle.id.clone(), handle.clone());
        handle
    }

    pub async fn get(&self, id: &str) -> Option<Arc<JobHandle>> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Snapshots of every retained job, newest first.
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .map(|h| h.snapshot())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Remove a job, but only once it has reached a terminal state.
    pub async fn remove_if_terminal(&self, id: &str) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get(id) {
            Some(handle) if handle.is_terminal() => {
                jobs.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Evict `id` once the retention window has elapsed from now.
    pub fn schedule_eviction(self: &Arc<Self>, id: &str) {
        let registry = Arc::clone(self);
        let id = id.to_string();
        let retention = self.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if registry.remove_if_terminal(&id).await {
                tracing::debug!(job_id = %id, "evicted finished job");
            }
        });
    }

    /// Drop every terminal job whose retention window ended before `now`.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return 0;
        };
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, handle| {
            let job = handle.state.borrow();
            match job.completed_at {
                Some(done) if job.status.is_terminal() => done + retention > now,
                _ => true,
            }
        });
        before - jobs.len()
    }

    /// Backstop for the per-job timers: periodically run
    /// [`evict_expired`](Self::evict_expired).
    pub async fn sweep_loop(self: Arc<Self>, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = self.evict_expired(Utc::now()).await;
            if evicted > 0 {
                tracing::info!(evicted, "swept expired jobs");
            }
        }
    }
}
