//! Best-effort job event fan-out for Server-Sent Events subscribers

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::state::{JobSnapshot, JobState};

/// One event pushed to subscribers of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub snapshot: JobSnapshot,
}

impl JobEvent {
    pub fn new(snapshot: JobSnapshot) -> Self {
        Self {
            job_id: snapshot.job_id.clone(),
            snapshot,
        }
    }

    /// SSE event name: `progress`, `completed`, `failed` or `timed_out`
    pub fn name(&self) -> &'static str {
        match self.snapshot.state {
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
            _ => "progress",
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.snapshot.state.is_terminal()
    }
}

/// Process-scoped broadcaster. Late subscribers miss earlier events.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<JobEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: JobEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}
