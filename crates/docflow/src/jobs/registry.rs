//! Process-scoped job registry
//!
//! Single-instance only: snapshots live in memory and are lost on restart.
//! The upstream services stay the durable source of truth for job status.

use dashmap::DashMap;
use tokio::task::AbortHandle;

use super::events::{EventHub, JobEvent};
use super::state::{JobKind, JobSnapshot, JobState};

/// In-memory job table plus the abort handles of running watchers
pub struct JobRegistry {
    jobs: DashMap<String, JobSnapshot>,
    watchers: DashMap<String, AbortHandle>,
    events: EventHub,
}

impl JobRegistry {
    pub fn new(events: EventHub) -> Self {
        Self {
            jobs: DashMap::new(),
            watchers: DashMap::new(),
            events,
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Record a freshly dispatched job, replacing any earlier run of it
    pub fn register(&self, kind: JobKind, task_id: &str, agent_user_id: Option<String>) -> JobSnapshot {
        let mut snapshot = JobSnapshot::new(kind, task_id, agent_user_id);
        snapshot.state = JobState::Dispatched;
        snapshot.message = "Dispatched".to_string();

        if let Some((_, old)) = self.watchers.remove(&snapshot.job_id) {
            old.abort();
        }
        self.jobs.insert(snapshot.job_id.clone(), snapshot.clone());
        tracing::info!(job_id = %snapshot.job_id, "Job registered");
        snapshot
    }

    /// Apply `f` to a job and publish the result. Terminal jobs are frozen.
    pub fn update<F>(&self, job_id: &str, f: F) -> Option<JobSnapshot>
    where
        F: FnOnce(&mut JobSnapshot),
    {
        let snapshot = {
            let mut entry = self.jobs.get_mut(job_id)?;
            if entry.state.is_terminal() {
                return Some(entry.clone());
            }
            f(entry.value_mut());
            entry.touch();
            entry.clone()
        };

        if snapshot.state.is_terminal() {
            self.watchers.remove(job_id);
        }
        self.events.publish(JobEvent::new(snapshot.clone()));
        Some(snapshot)
    }

    /// Remember a watcher's abort handle unless its job already finished
    pub fn attach_watcher(&self, job_id: &str, handle: AbortHandle) {
        // The job entry stays locked so a concurrent terminal update cannot
        // slip in between the check and the insert.
        if let Some(job) = self.jobs.get(job_id) {
            if !job.state.is_terminal() {
                self.watchers.insert(job_id.to_string(), handle);
            }
        }
    }

    pub fn get(&self, job_id: &str) -> Option<JobSnapshot> {
        self.jobs.get(job_id).map(|j| j.clone())
    }

    /// Most recently updated job for an upstream task id
    pub fn latest_for_task(&self, task_id: &str) -> Option<JobSnapshot> {
        self.jobs
            .iter()
            .filter(|j| j.task_id == task_id)
            .max_by_key(|j| j.updated_at)
            .map(|j| j.clone())
    }

    /// All jobs, newest first
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = self.jobs.iter().map(|j| j.clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn is_watching(&self, job_id: &str) -> bool {
        self.watchers.contains_key(job_id)
    }

    /// Stop the local watcher. The upstream job keeps running.
    pub fn cancel(&self, job_id: &str) -> Option<JobSnapshot> {
        if let Some((_, handle)) = self.watchers.remove(job_id) {
            handle.abort();
        }
        let snapshot = self.update(job_id, |job| {
            job.state = JobState::Failed;
            job.message = "Polling cancelled locally; the upstream job may still be running".to_string();
        })?;
        tracing::info!(job_id, "Job watcher cancelled");
        Some(snapshot)
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(EventHub::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_update_and_freeze() {
        let registry = JobRegistry::default();
        let snap = registry.register(JobKind::Ocr, "3", Some("123".to_string()));
        assert_eq!(snap.job_id, "ocr:3");
        assert_eq!(snap.state, JobState::Dispatched);

        registry.update("ocr:3", |j| {
            j.state = JobState::Completed;
            j.progress = 100;
        });
        let frozen = registry
            .update("ocr:3", |j| j.state = JobState::Polling)
            .unwrap();
        assert_eq!(frozen.state, JobState::Completed);
        assert!(registry.update("missing", |_| {}).is_none());
    }

    #[test]
    fn test_latest_for_task() {
        let registry = JobRegistry::default();
        registry.register(JobKind::Ocr, "9", None);
        std::thread::sleep(std::time::Duration::from_millis(2));
        registry.register(JobKind::Extract, "9", None);
        assert_eq!(registry.latest_for_task("9").unwrap().kind, JobKind::Extract);
        assert!(registry.latest_for_task("10").is_none());
    }

    #[tokio::test]
    async fn test_cancel_aborts_watcher() {
        let registry = JobRegistry::default();
        registry.register(JobKind::Schema, "1", None);

        let task = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        registry.attach_watcher("schema:1", task.abort_handle());
        assert!(registry.is_watching("schema:1"));

        let snap = registry.cancel("schema:1").unwrap();
        assert_eq!(snap.state, JobState::Failed);
        assert!(!registry.is_watching("schema:1"));
        assert!(task.await.unwrap_err().is_cancelled());
    }
}
