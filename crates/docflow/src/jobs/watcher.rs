//! Server-side watchers: one spawned poller per watched job

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::classify::{ArtifactClassifier, OcrClassifier, PipelineClassifier, ServiceStatusClassifier};
use super::poller::{poll_until, Classify, PollPolicy, StatusSource};
use super::registry::JobRegistry;
use super::state::{JobKind, JobSnapshot, JobState};
use crate::config::PollingConfig;
use crate::dispatch::{Service, ServiceClient, StatusProbe};
use crate::error::{Error, Result};
use crate::schema::SchemaStore;
use crate::storage::{ensure_component, first_file, StorageLayout, GENERATED_SCHEMA_DIR};

/// Reads the first existing JSON artifact among `paths`; none reads as HTTP 404
#[derive(Debug, Clone)]
pub struct ArtifactSource {
    pub paths: Vec<PathBuf>,
}

impl ArtifactSource {
    pub fn single(path: PathBuf) -> Self {
        Self { paths: vec![path] }
    }
}

#[async_trait]
impl StatusSource for ArtifactSource {
    async fn fetch(&self) -> Result<StatusProbe> {
        for path in &self.paths {
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    return Ok(StatusProbe {
                        status: 200,
                        // A half-written file parses as nothing yet
                        body: serde_json::from_slice(&bytes).unwrap_or(Value::Null),
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(StatusProbe {
            status: 404,
            body: Value::Null,
        })
    }
}

/// Upstream status endpoint of a job
#[derive(Debug, Clone)]
pub enum StatusEndpoint {
    Report { service: Service, task_id: String },
    Pipeline { query_id: String },
}

/// Fetches status over HTTP from one of the processing services
#[derive(Clone)]
pub struct ServiceStatusSource {
    pub client: ServiceClient,
    pub endpoint: StatusEndpoint,
}

#[async_trait]
impl StatusSource for ServiceStatusSource {
    async fn fetch(&self) -> Result<StatusProbe> {
        match &self.endpoint {
            StatusEndpoint::Report { service, task_id } => {
                self.client.report_status(*service, task_id).await
            }
            StatusEndpoint::Pipeline { query_id } => self.client.pipeline_status(query_id).await,
        }
    }
}

/// Request to watch an already dispatched job
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest {
    pub task_id: String,
    #[serde(default)]
    pub agent_user_id: Option<String>,
    /// OCR input file; defaults to the first file of the upload directory
    #[serde(default)]
    pub file_name: Option<String>,
    /// Pipeline query id returned by run_check
    #[serde(default)]
    pub query_id: Option<String>,
}

/// Everything a spawned poller needs
pub struct WatchPlan {
    pub source: Box<dyn StatusSource>,
    pub classifier: Box<dyn Classify>,
    pub policy: PollPolicy,
}

/// Builds poll plans and spawns watchers into the registry
#[derive(Clone)]
pub struct JobWatcher {
    registry: Arc<JobRegistry>,
    client: ServiceClient,
    layout: StorageLayout,
    polling: PollingConfig,
    default_user: String,
}

impl JobWatcher {
    pub fn new(
        registry: Arc<JobRegistry>,
        client: ServiceClient,
        layout: StorageLayout,
        polling: PollingConfig,
        default_user: String,
    ) -> Self {
        Self {
            registry,
            client,
            layout,
            polling,
            default_user,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Work out where and how a job of `kind` is observed
    pub async fn plan(&self, kind: JobKind, request: &WatchRequest) -> Result<WatchPlan> {
        let task_id = ensure_component("taskId", &request.task_id)?.to_string();
        let user = match request.agent_user_id.as_deref() {
            Some(u) if !u.trim().is_empty() => ensure_component("agentUserId", u)?.to_string(),
            _ => self.default_user.clone(),
        };
        let policy = PollPolicy::from(kind.policy(&self.polling));

        let (source, classifier): (Box<dyn StatusSource>, Box<dyn Classify>) = match kind {
            JobKind::Ocr => {
                let file_name = match &request.file_name {
                    Some(name) => name.clone(),
                    None => first_file(&self.layout.upload_dir(&user, &task_id))
                        .await
                        .ok_or_else(|| {
                            Error::not_found(format!("No uploaded file for task {}", task_id))
                        })?,
                };
                let base_name = Path::new(&file_name)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or(file_name);
                (
                    Box::new(ServiceStatusSource {
                        client: self.client.clone(),
                        endpoint: StatusEndpoint::Report {
                            service: Service::Ocr,
                            task_id: task_id.clone(),
                        },
                    }),
                    Box::new(OcrClassifier {
                        save_dir: self.layout.save_dir(&user, &task_id),
                        base_name,
                    }),
                )
            }
            JobKind::Schema => (
                Box::new(ArtifactSource::single(
                    self.layout.artifact_path(GENERATED_SCHEMA_DIR, &user, &task_id),
                )),
                Box::new(ArtifactClassifier),
            ),
            // Same lookup order as a result read through the schema store
            JobKind::Extract => (
                Box::new(ArtifactSource {
                    paths: SchemaStore::new(self.layout.clone()).result_candidates(&user, &task_id),
                }),
                Box::new(ArtifactClassifier),
            ),
            JobKind::Entity => (
                Box::new(ServiceStatusSource {
                    client: self.client.clone(),
                    endpoint: StatusEndpoint::Report {
                        service: Service::Extract,
                        task_id: task_id.clone(),
                    },
                }),
                Box::new(ServiceStatusClassifier),
            ),
            JobKind::Pipeline => {
                let query_id = request
                    .query_id
                    .clone()
                    .filter(|q| !q.trim().is_empty())
                    .ok_or_else(|| Error::invalid("queryId is required for pipeline jobs"))?;
                (
                    Box::new(ServiceStatusSource {
                        client: self.client.clone(),
                        endpoint: StatusEndpoint::Pipeline { query_id },
                    }),
                    Box::new(PipelineClassifier),
                )
            }
        };

        Ok(WatchPlan {
            source,
            classifier,
            policy,
        })
    }

    /// Register the job and spawn its poller
    pub async fn watch(&self, kind: JobKind, request: &WatchRequest) -> Result<JobSnapshot> {
        let plan = self.plan(kind, request).await?;
        let user = request
            .agent_user_id
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| self.default_user.clone());
        let snapshot = self.registry.register(kind, request.task_id.trim(), Some(user));
        Ok(self.spawn(snapshot, plan))
    }

    /// Spawn the poller for an already registered job
    pub fn spawn(&self, snapshot: JobSnapshot, plan: WatchPlan) -> JobSnapshot {
        let job_id = snapshot.job_id.clone();
        let max_attempts = plan.policy.max_attempts;
        let snapshot = self
            .registry
            .update(&job_id, |job| {
                job.state = JobState::Polling;
                job.max_attempts = max_attempts;
                job.message = "Polling".to_string();
            })
            .unwrap_or(snapshot);

        let registry = Arc::clone(&self.registry);
        let task_job_id = job_id.clone();
        let handle = tokio::spawn(async move {
            let WatchPlan {
                source,
                classifier,
                policy,
            } = plan;

            let terminal = poll_until(source.as_ref(), classifier.as_ref(), policy, |update| {
                if update.state.is_terminal() {
                    return;
                }
                registry.update(&task_job_id, |job| {
                    job.state = update.state;
                    job.progress = update.progress;
                    job.message = update.message.clone();
                    job.attempts = update.attempt;
                });
            })
            .await;

            tracing::info!(
                job_id = %task_job_id,
                state = terminal.state().as_str(),
                attempts = terminal.attempts(),
                "Job finished"
            );

            registry.update(&task_job_id, |job| {
                job.state = terminal.state();
                job.attempts = terminal.attempts();
                job.message = terminal.message();
                job.result = terminal.result().cloned();
                if job.state == JobState::Completed {
                    job.progress = 100;
                }
            });
        });

        self.registry.attach_watcher(&job_id, handle.abort_handle());
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PollPolicyConfig, ServicesConfig};
    use crate::jobs::events::EventHub;
    use std::time::Duration;

    fn watcher(root: &Path, polling: PollingConfig) -> JobWatcher {
        JobWatcher::new(
            Arc::new(JobRegistry::new(EventHub::new(64))),
            ServiceClient::new(ServicesConfig::default()),
            StorageLayout::new(root.join("public"), root.join("data")),
            polling,
            "123".to_string(),
        )
    }

    fn fast_polling() -> PollingConfig {
        PollingConfig {
            ocr: PollPolicyConfig::new(3, 5),
            schema: PollPolicyConfig::new(50, 5),
            extract: PollPolicyConfig::new(3, 5),
            entity: PollPolicyConfig::new(3, 5),
            pipeline: PollPolicyConfig::new(3, 5),
        }
    }

    async fn wait_terminal(watcher: &JobWatcher, job_id: &str) -> JobSnapshot {
        for _ in 0..200 {
            if let Some(job) = watcher.registry().get(job_id) {
                if job.state.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never finished", job_id);
    }

    fn request(task_id: &str) -> WatchRequest {
        WatchRequest {
            task_id: task_id.to_string(),
            agent_user_id: Some("123".to_string()),
            file_name: None,
            query_id: None,
        }
    }

    #[tokio::test]
    async fn test_schema_artifact_completes() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = watcher(dir.path(), fast_polling());
        let mut events = watcher.registry().events().subscribe();

        let snapshot = watcher.watch(JobKind::Schema, &request("4")).await.unwrap();
        assert_eq!(snapshot.state, JobState::Polling);

        let artifact = dir.path().join("data/generater_json/123/4.json");
        std::fs::create_dir_all(artifact.parent().unwrap()).unwrap();
        std::fs::write(&artifact, r#"{"人员": [{"name": "姓名"}]}"#).unwrap();

        let done = wait_terminal(&watcher, "schema:4").await;
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.result.unwrap().get("人员").is_some());
        assert!(!watcher.registry().is_watching("schema:4"));

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        assert_eq!(last.unwrap().name(), "completed");
    }

    #[tokio::test]
    async fn test_extraction_result_at_fallback_path() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = watcher(dir.path(), fast_polling());

        let output = dir.path().join("data/output");
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(output.join("final_result12.json"), r#"{"k": 1}"#).unwrap();
        watcher.watch(JobKind::Extract, &request("12")).await.unwrap();
        let done = wait_terminal(&watcher, "extract:12").await;
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.result.unwrap()["k"], 1);

        std::fs::write(output.join("9.json"), r#"{"k": 2}"#).unwrap();
        watcher.watch(JobKind::Extract, &request("9")).await.unwrap();
        let done = wait_terminal(&watcher, "extract:9").await;
        assert_eq!(done.state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_extraction_timeout_message() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = watcher(dir.path(), fast_polling());

        watcher.watch(JobKind::Extract, &request("9")).await.unwrap();
        let done = wait_terminal(&watcher, "extract:9").await;

        assert_eq!(done.state, JobState::TimedOut);
        assert_eq!(done.attempts, 3);
        assert!(done.message.contains("timed out"));
        assert!(done.progress < 100);
    }

    #[tokio::test]
    async fn test_plan_validation() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = watcher(dir.path(), fast_polling());

        let err = watcher.watch(JobKind::Pipeline, &request("1")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        let err = watcher.watch(JobKind::Ocr, &request("1")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = watcher.watch(JobKind::Schema, &request("../x")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
