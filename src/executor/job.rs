// Bastion — Job State Machine and Tracker
//
// Jobs move Pending → Running → {Completed, Failed, Cancelled}. The
// tracker owns every job exclusively; callers only ever see snapshots.
// Admission is a single check-then-increment critical section, so the
// running count can never exceed the ceiling. Completion transitions
// apply only while the job is still Running — a result arriving after
// cancellation is discarded by that guard.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::task::AbortHandle;
use uuid::Uuid;

use super::ExecutorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A tracked tool execution. Exposed read-only via snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub job_id: Uuid,
    pub bridge_id: String,
    pub tool_name: String,
    pub state: JobState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// 0–100; coarse, set at transitions.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct TrackerInner {
    jobs: HashMap<Uuid, Job>,
    aborts: HashMap<Uuid, AbortHandle>,
    running: usize,
}

/// Owner of all job state. Shared behind an `Arc`.
pub struct JobTracker {
    inner: Mutex<TrackerInner>,
    max_running: usize,
}

impl JobTracker {
    pub fn new(max_running: usize) -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                jobs: HashMap::new(),
                aborts: HashMap::new(),
                running: 0,
            }),
            max_running,
        }
    }

    /// Admit a new job. The capacity check and the transition to Running
    /// happen under one lock; overflow is rejected, never queued.
    pub fn admit(&self, bridge_id: &str, tool_name: &str) -> Result<Uuid, ExecutorError> {
        let mut inner = self.lock();
        if inner.running >= self.max_running {
            return Err(ExecutorError::CapacityExceeded);
        }

        let mut job = Job {
            job_id: Uuid::new_v4(),
            bridge_id: bridge_id.to_string(),
            tool_name: tool_name.to_string(),
            state: JobState::Pending,
            start_time: Utc::now(),
            end_time: None,
            progress: 0,
            result: None,
            error: None,
        };
        // Slot granted: Pending → Running inside the same critical section.
        job.state = JobState::Running;
        let id = job.job_id;
        inner.jobs.insert(id, job);
        inner.running += 1;
        Ok(id)
    }

    /// Attach the abort handle of the task driving this job.
    pub fn register_abort(&self, id: Uuid, handle: AbortHandle) {
        let mut inner = self.lock();
        if inner.jobs.get(&id).map(|j| j.state) == Some(JobState::Running) {
            inner.aborts.insert(id, handle);
        }
    }

    /// Running → Completed. Returns false (and discards the result) if the
    /// job is no longer Running, e.g. it was cancelled meanwhile.
    pub fn complete(&self, id: Uuid, result: Value) -> bool {
        self.finish(id, JobState::Completed, Some(result), None)
    }

    /// Running → Failed with a sanitized error message.
    pub fn fail(&self, id: Uuid, error: &str) -> bool {
        self.finish(id, JobState::Failed, None, Some(error.to_string()))
    }

    /// Running → Cancelled; aborts the underlying task if one is attached.
    pub fn cancel(&self, id: Uuid) -> Result<(), ExecutorError> {
        let abort = {
            let mut inner = self.lock();
            let job = inner
                .jobs
                .get_mut(&id)
                .ok_or(ExecutorError::JobNotFound(id))?;
            if job.state != JobState::Running {
                return Err(ExecutorError::NotRunning(id));
            }
            job.state = JobState::Cancelled;
            job.end_time = Some(Utc::now());
            job.error = Some("Job was cancelled".to_string());
            inner.running -= 1;
            inner.aborts.remove(&id)
        };

        if let Some(handle) = abort {
            handle.abort();
        }
        Ok(())
    }

    pub fn snapshot(&self, id: &Uuid) -> Option<Job> {
        self.lock().jobs.get(id).cloned()
    }

    pub fn list(&self) -> Vec<Job> {
        self.lock().jobs.values().cloned().collect()
    }

    /// Remove a terminal job. Returns true if something was evicted.
    pub fn evict(&self, id: Uuid) -> bool {
        let mut inner = self.lock();
        match inner.jobs.get(&id) {
            Some(job) if job.state.is_terminal() => {
                inner.jobs.remove(&id);
                inner.aborts.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub fn running_count(&self) -> usize {
        self.lock().running
    }

    fn finish(&self, id: Uuid, state: JobState, result: Option<Value>, error: Option<String>) -> bool {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(&id) else {
            return false;
        };
        if job.state != JobState::Running {
            return false;
        }

        job.state = state;
        job.end_time = Some(Utc::now());
        job.progress = 100;
        job.result = result;
        job.error = error;
        inner.running -= 1;
        inner.aborts.remove(&id);
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        self.inner.lock().expect("job tracker lock poisoned")
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
