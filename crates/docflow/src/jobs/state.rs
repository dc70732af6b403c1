//! Unified job lifecycle shared by every watched external operation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{PollPolicyConfig, PollingConfig};

/// Lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Dispatched,
    Polling,
    Completed,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::TimedOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Dispatched => "dispatched",
            JobState::Polling => "polling",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
        }
    }
}

/// Kind of external operation being tracked
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// OCR report generation
    Ocr,
    /// Schema generation, observed through its JSON artifact
    Schema,
    /// Extraction, observed through its JSON artifact
    Extract,
    /// Entity extraction, observed through the service status endpoint
    Entity,
    /// Parsing pipeline run-check
    Pipeline,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Ocr => "ocr",
            JobKind::Schema => "schema",
            JobKind::Extract => "extract",
            JobKind::Entity => "entity",
            JobKind::Pipeline => "pipeline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ocr" => Some(JobKind::Ocr),
            "schema" | "generate" => Some(JobKind::Schema),
            "extract" => Some(JobKind::Extract),
            "entity" => Some(JobKind::Entity),
            "pipeline" => Some(JobKind::Pipeline),
            _ => None,
        }
    }

    /// Configured poll policy for this kind
    pub fn policy(&self, polling: &PollingConfig) -> PollPolicyConfig {
        match self {
            JobKind::Ocr => polling.ocr,
            JobKind::Schema => polling.schema,
            JobKind::Extract => polling.extract,
            JobKind::Entity => polling.entity,
            JobKind::Pipeline => polling.pipeline,
        }
    }

    /// Registry key of a job of this kind for an upstream task id
    pub fn job_id(&self, task_id: &str) -> String {
        format!("{}:{}", self.as_str(), task_id)
    }
}

/// Point-in-time view of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: String,
    pub task_id: String,
    pub kind: JobKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_user_id: Option<String>,
    pub state: JobState,
    /// 0..=100, 100 only once completed
    pub progress: u8,
    pub message: String,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    pub fn new(kind: JobKind, task_id: &str, agent_user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: kind.job_id(task_id),
            task_id: task_id.to_string(),
            kind,
            agent_user_id,
            state: JobState::Idle,
            progress: 0,
            message: String::new(),
            attempts: 0,
            max_attempts: 0,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
