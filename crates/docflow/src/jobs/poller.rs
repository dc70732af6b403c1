//! Parameterized status poller
//!
//! One loop serves every job kind. A [`StatusSource`] fetches the raw status,
//! a [`Classify`] implementation maps it onto an [`Observation`], and the
//! [`PollPolicy`] bounds the number of attempts. Nothing is ever sent to the
//! upstream service to stop a job; dropping the future only stops polling.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::state::JobState;
use crate::config::PollPolicyConfig;
use crate::dispatch::StatusProbe;
use crate::error::Result;

/// Attempt budget and spacing for one job kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

impl From<PollPolicyConfig> for PollPolicy {
    fn from(config: PollPolicyConfig) -> Self {
        Self::new(config.max_attempts, config.interval())
    }
}

/// What one status response means for the job
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// The service does not know the job yet (e.g. HTTP 404)
    NotReady,
    /// Still running; genuine progress when the service reports one
    Pending {
        progress: Option<u8>,
        message: Option<String>,
    },
    Completed(Value),
    Failed(String),
}

/// Fetches the raw status of one job
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self) -> Result<StatusProbe>;
}

/// Maps a raw status onto an [`Observation`]
#[async_trait]
pub trait Classify: Send + Sync {
    async fn classify(&self, probe: &StatusProbe) -> Observation;
}

/// Emitted after every attempt, including the terminal one
#[derive(Debug, Clone, PartialEq)]
pub struct PollUpdate {
    pub attempt: u32,
    pub max_attempts: u32,
    pub state: JobState,
    pub progress: u8,
    pub message: String,
}

/// How polling ended
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Completed { result: Value, attempts: u32 },
    Failed { message: String, attempts: u32 },
    TimedOut { attempts: u32 },
}

impl Terminal {
    pub fn state(&self) -> JobState {
        match self {
            Terminal::Completed { .. } => JobState::Completed,
            Terminal::Failed { .. } => JobState::Failed,
            Terminal::TimedOut { .. } => JobState::TimedOut,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Terminal::Completed { attempts, .. }
            | Terminal::Failed { attempts, .. }
            | Terminal::TimedOut { attempts } => *attempts,
        }
    }

    /// User-facing message; a timeout never reads like a backend failure
    pub fn message(&self) -> String {
        match self {
            Terminal::Completed { .. } => "Completed".to_string(),
            Terminal::Failed { message, .. } => format!("Backend reported failure: {}", message),
            Terminal::TimedOut { attempts } => {
                format!("Operation timed out after {} attempts", attempts)
            }
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            Terminal::Completed { result, .. } => Some(result),
            _ => None,
        }
    }
}

/// `min(floor(attempt / max * 90), 90)`
pub fn synthesized_progress(attempt: u32, max_attempts: u32) -> u8 {
    if max_attempts == 0 {
        return 0;
    }
    let scaled = (attempt as u64 * 90) / max_attempts as u64;
    scaled.min(90) as u8
}

/// Poll until the job completes, fails, or the attempt budget runs out.
///
/// The interval elapses before every fetch. Transport errors count as
/// attempts that saw nothing.
pub async fn poll_until<S, C, F>(
    source: &S,
    classifier: &C,
    policy: PollPolicy,
    mut observer: F,
) -> Terminal
where
    S: StatusSource + ?Sized,
    C: Classify + ?Sized,
    F: FnMut(&PollUpdate) + Send,
{
    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.interval).await;

        let observation = match source.fetch().await {
            Ok(probe) => classifier.classify(&probe).await,
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Status fetch failed");
                Observation::NotReady
            }
        };

        let synthesized = synthesized_progress(attempt, policy.max_attempts);
        let mut update = PollUpdate {
            attempt,
            max_attempts: policy.max_attempts,
            state: JobState::Polling,
            progress: synthesized,
            message: String::new(),
        };

        let terminal = match observation {
            Observation::NotReady => {
                update.message = "Waiting for the service to report".to_string();
                None
            }
            Observation::Pending { progress, message } => {
                update.progress = progress.map(|p| p.min(99)).unwrap_or(synthesized);
                update.message = message.unwrap_or_else(|| "Processing".to_string());
                None
            }
            Observation::Completed(result) => Some(Terminal::Completed {
                result,
                attempts: attempt,
            }),
            Observation::Failed(message) => Some(Terminal::Failed {
                message,
                attempts: attempt,
            }),
        };

        if let Some(terminal) = terminal {
            update.state = terminal.state();
            update.message = terminal.message();
            if update.state == JobState::Completed {
                update.progress = 100;
            }
            observer(&update);
            return terminal;
        }

        tracing::debug!(attempt, progress = update.progress, "Job still running");
        observer(&update);
    }

    let terminal = Terminal::TimedOut {
        attempts: policy.max_attempts,
    };
    observer(&PollUpdate {
        attempt: policy.max_attempts,
        max_attempts: policy.max_attempts,
        state: JobState::TimedOut,
        progress: synthesized_progress(policy.max_attempts, policy.max_attempts),
        message: terminal.message(),
    });
    terminal
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::jobs::classify::ServiceStatusClassifier;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays scripted probes, repeating the last one forever
    pub(crate) struct ScriptedSource {
        script: Mutex<VecDeque<StatusProbe>>,
        last: Mutex<Option<StatusProbe>>,
        pub calls: AtomicU32,
    }

    impl ScriptedSource {
        pub(crate) fn new(script: Vec<StatusProbe>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn fetch(&self) -> Result<StatusProbe> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front();
            let probe = match next {
                Some(p) => {
                    *self.last.lock() = Some(p.clone());
                    p
                }
                None => self.last.lock().clone().unwrap_or(StatusProbe {
                    status: 404,
                    body: Value::Null,
                }),
            };
            Ok(probe)
        }
    }

    pub(crate) fn probe(status: u16, body: Value) -> StatusProbe {
        StatusProbe { status, body }
    }

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_synthesized_progress() {
        assert_eq!(synthesized_progress(0, 60), 0);
        assert_eq!(synthesized_progress(1, 60), 1);
        assert_eq!(synthesized_progress(30, 60), 45);
        assert_eq!(synthesized_progress(60, 60), 90);
        assert_eq!(synthesized_progress(80, 60), 90);
        assert_eq!(synthesized_progress(3, 0), 0);
    }

    #[tokio::test]
    async fn test_not_found_then_processing_then_completed() {
        let source = ScriptedSource::new(vec![
            probe(404, json!({"detail": "Not Found"})),
            probe(404, json!({"detail": "Not Found"})),
            probe(200, json!({"status": "processing"})),
            probe(200, json!({"status": "completed", "result": {"a": 1}})),
        ]);

        let mut updates = Vec::new();
        let terminal = poll_until(&source, &ServiceStatusClassifier, fast(10), |u| {
            updates.push(u.clone())
        })
        .await;

        let states: Vec<JobState> = updates.iter().map(|u| u.state).collect();
        assert_eq!(
            states,
            vec![JobState::Polling, JobState::Polling, JobState::Polling, JobState::Completed]
        );
        for u in &updates[..3] {
            assert!(u.progress < 100);
        }
        assert_eq!(updates[3].progress, 100);
        assert!(matches!(terminal, Terminal::Completed { attempts: 4, .. }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_timeout_issues_no_extra_calls() {
        let source = ScriptedSource::new(vec![probe(200, json!({"status": "processing"}))]);

        let mut last = None;
        let terminal = poll_until(&source, &ServiceStatusClassifier, fast(5), |u| {
            last = Some(u.clone())
        })
        .await;

        assert_eq!(terminal, Terminal::TimedOut { attempts: 5 });
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
        let last = last.unwrap();
        assert_eq!(last.state, JobState::TimedOut);
        assert!(last.progress < 100);

        // Give any stray poll a chance to show up
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_failure_and_timeout_messages_differ() {
        let failing = ScriptedSource::new(vec![probe(
            200,
            json!({"status": "failed", "error": "schema invalid"}),
        )]);
        let failed = poll_until(&failing, &ServiceStatusClassifier, fast(5), |_| {}).await;
        assert_eq!(failed.state(), JobState::Failed);
        assert!(failed.message().contains("schema invalid"));

        let silent = ScriptedSource::new(vec![probe(404, Value::Null)]);
        let timed_out = poll_until(&silent, &ServiceStatusClassifier, fast(3), |_| {}).await;
        assert_eq!(timed_out.state(), JobState::TimedOut);
        assert_ne!(failed.message(), timed_out.message());
        assert!(timed_out.message().contains("timed out"));
    }

    #[tokio::test]
    async fn test_genuine_progress_is_clamped_below_completion() {
        let source = ScriptedSource::new(vec![
            probe(200, json!({"status": "processing", "progress": 100})),
            probe(200, json!({"status": "completed", "file_path": "/x"})),
        ]);
        let mut progress = Vec::new();
        poll_until(&source, &ServiceStatusClassifier, fast(5), |u| progress.push(u.progress)).await;
        assert_eq!(progress, vec![99, 100]);
    }

    #[tokio::test]
    async fn test_zero_budget_times_out_without_calls() {
        let source = ScriptedSource::new(vec![]);
        let terminal = poll_until(&source, &ServiceStatusClassifier, fast(0), |_| {}).await;
        assert_eq!(terminal, Terminal::TimedOut { attempts: 0 });
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
