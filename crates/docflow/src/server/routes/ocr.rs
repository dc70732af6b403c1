//! OCR submission, status relay and task cleanup

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;

use super::raw_body;
use crate::dispatch::{user_id_value, OcrRequest, Service, DEFAULT_LARGE_MODEL_PROMPT};
use crate::documents::remove_dir_if_exists;
use crate::error::{Error, Result};
use crate::gateway::next_free_task_id;
use crate::jobs::classify::{find_ocr_output, OCR_COMPLETED, OCR_FAILED, OCR_PROCESSING};
use crate::jobs::{JobKind, WatchRequest};
use crate::server::state::AppState;
use crate::storage::{ensure_component, first_file};

/// Legacy OCR status codes returned by `GET /api/ocr`
const LEGACY_PENDING: u8 = 1;
const LEGACY_PROCESSING: u8 = 2;
const LEGACY_COMPLETED: u8 = 3;
const LEGACY_FAILED: u8 = 4;

/// Body of `POST /api/ocr`
#[derive(Debug, Deserialize)]
pub struct OcrSubmitRequest {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(rename = "agentUserId", default)]
    pub agent_user_id: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub use_large_model: bool,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrSubmitResponse {
    pub ok: bool,
    pub task_id: String,
    pub status: u8,
    pub message: String,
    pub job_id: String,
}

/// `?taskId=` of the status and delete relays
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    pub task_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrStatusResponse {
    pub ok: bool,
    pub task_id: String,
    pub status: u8,
    pub file_name: String,
    pub agent_user_id: String,
    pub input_file_path: String,
    pub output_file_path: String,
    pub file_exists: bool,
    pub file_size: u64,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Build the OCR submission for an uploaded file.
///
/// The services read from the host upload root and write into the host save
/// root; both are translated from the container layout.
pub fn ocr_request(
    state: &AppState,
    user: &str,
    task_id: &str,
    file_name: &str,
    prompt: Option<String>,
) -> Result<OcrRequest> {
    let layout = state.layout();
    let translator = state.translator();
    Ok(OcrRequest {
        task_id: task_id.to_string(),
        status: if prompt.is_some() { 1 } else { 0 },
        agent_user_id: user_id_value(user),
        file_name: file_name.to_string(),
        input_file_path: translator.to_host(&layout.upload_root().to_string_lossy())?,
        output_file_path: translator.to_host(&layout.save_root().to_string_lossy())?,
        prompt,
    })
}

/// Start watching an accepted OCR job; a watcher failure is only logged
pub async fn watch_ocr(state: &AppState, user: &str, task_id: &str, file_name: &str) -> Option<String> {
    let request = WatchRequest {
        task_id: task_id.to_string(),
        agent_user_id: Some(user.to_string()),
        file_name: Some(file_name.to_string()),
        query_id: None,
    };
    match state.watcher().watch(JobKind::Ocr, &request).await {
        Ok(snapshot) => Some(snapshot.job_id),
        Err(e) => {
            tracing::warn!(task_id, error = %e, "Failed to watch OCR job");
            None
        }
    }
}

/// POST /api/ocr - Submit an OCR job to the small or large model
pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<OcrSubmitRequest>,
) -> Result<Json<OcrSubmitResponse>> {
    let user = request
        .agent_user_id
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| Error::invalid("agentUserId is required"))?;
    let user = ensure_component("agentUserId", user)?;
    let file_name = request
        .file_name
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| Error::invalid("file_name is required"))?;

    let task_id = match request.task_id.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(id) => ensure_component("task_id", id)?.to_string(),
        None => next_free_task_id(&state.layout().user_upload_dir(user)).await?,
    };

    if request.use_large_model {
        let prompt = request
            .prompt
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LARGE_MODEL_PROMPT.to_string());
        let ocr = ocr_request(&state, user, &task_id, file_name, Some(prompt))?;
        state.client().submit_large_model_ocr(&ocr).await?;
    } else {
        let ocr = ocr_request(&state, user, &task_id, file_name, None)?;
        state.client().submit_ocr(&ocr).await?;
    }

    let job_id = watch_ocr(&state, user, &task_id, file_name)
        .await
        .unwrap_or_else(|| JobKind::Ocr.job_id(&task_id));

    Ok(Json(OcrSubmitResponse {
        ok: true,
        status: LEGACY_PROCESSING,
        message: "OCR task submitted".to_string(),
        task_id,
        job_id,
    }))
}

fn legacy_status(code: Option<i64>) -> u8 {
    match code {
        Some(OCR_COMPLETED) => LEGACY_COMPLETED,
        Some(OCR_PROCESSING) => LEGACY_PROCESSING,
        Some(OCR_FAILED) => LEGACY_FAILED,
        _ => LEGACY_PENDING,
    }
}

/// Owner of a task: the first user directory holding it, else the default user
async fn owner_of(state: &AppState, task_id: &str) -> String {
    let upload_root = state.layout().upload_root();
    if let Ok(mut entries) = tokio::fs::read_dir(&upload_root).await {
        let mut users = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            users.push(entry.file_name().to_string_lossy().into_owned());
        }
        users.sort();
        for user in users {
            if tokio::fs::try_exists(upload_root.join(&user).join(task_id))
                .await
                .unwrap_or(false)
            {
                return user;
            }
        }
    }
    state.default_user().to_string()
}

fn required_task_id(query: &TaskQuery) -> Result<&str> {
    let task_id = query
        .task_id
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| Error::invalid("taskId is required"))?;
    ensure_component("taskId", task_id)
}

/// GET /api/ocr - Relay the OCR report status with file information
pub async fn status(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<OcrStatusResponse>> {
    let task_id = required_task_id(&query)?;

    let probe = state.client().report_status(Service::Ocr, task_id).await?;
    if !probe.is_success() && !probe.is_not_found() {
        return Err(Error::rejected(Service::Ocr.name(), probe.status, raw_body(&probe.body)));
    }
    let code = probe.body.get("report_generation_status").and_then(Value::as_i64);
    let status = legacy_status(code);

    let user = owner_of(&state, task_id).await;
    let input_dir = state.layout().upload_dir(&user, task_id);
    let output_dir = state.layout().save_dir(&user, task_id);

    let mut response = OcrStatusResponse {
        ok: true,
        task_id: task_id.to_string(),
        status,
        file_name: String::new(),
        agent_user_id: user.clone(),
        input_file_path: String::new(),
        output_file_path: String::new(),
        file_exists: false,
        file_size: 0,
        progress: probe.body.get("progress").and_then(Value::as_f64).unwrap_or(0.0),
        error_message: None,
    };

    if let Some(file_name) = first_file(&input_dir).await {
        response.input_file_path = input_dir.join(&file_name).display().to_string();
        let base_name = Path::new(&file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.clone());
        if let Some((path, size)) = find_ocr_output(&output_dir, &base_name).await {
            response.file_exists = true;
            response.file_size = size;
            response.output_file_path = path.display().to_string();
        }
        response.file_name = file_name;
    }

    if status == LEGACY_FAILED {
        response.error_message = probe
            .body
            .get("report_generation_condition")
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    Ok(Json(response))
}

/// DELETE /api/ocr - Remove the upload and save directories of a task
pub async fn delete(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Value>> {
    let task_id = required_task_id(&query)?;
    let user = owner_of(&state, task_id).await;

    let removed_upload = remove_dir_if_exists(&state.layout().upload_dir(&user, task_id)).await?;
    let removed_save = remove_dir_if_exists(&state.layout().save_dir(&user, task_id)).await?;
    if let Some(job) = state.jobs().cancel(&JobKind::Ocr.job_id(task_id)) {
        tracing::debug!(job_id = %job.job_id, "Stopped watching deleted OCR task");
    }

    tracing::info!(user = %user, task_id, removed_upload, removed_save, "OCR task deleted");

    Ok(Json(json!({
        "ok": true,
        "message": format!("Task {} deleted", task_id),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::spawn_upstream;
    use crate::server::tests::{spawn_gateway, test_config};
    use axum::{extract::Path as UrlPath, routing::{get, post}, Router};

    fn ocr_upstream() -> Router {
        Router::new()
            .route(
                "/generate_report/",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["input_file_path"], "/host/upload");
                    assert_eq!(body["output_file_path"], "/host/save");
                    Json(json!({"report_generation_status": 0}))
                }),
            )
            .route(
                "/report_status/:task_id",
                get(|UrlPath(task_id): UrlPath<String>| async move {
                    if task_id == "7" {
                        Json(json!({"report_generation_status": 1, "report_generation_condition": "bad scan"}))
                    } else {
                        Json(json!({"report_generation_status": 2, "progress": 40}))
                    }
                }),
            )
    }

    #[test]
    fn test_legacy_status_mapping() {
        assert_eq!(legacy_status(Some(0)), LEGACY_COMPLETED);
        assert_eq!(legacy_status(Some(1)), LEGACY_FAILED);
        assert_eq!(legacy_status(Some(2)), LEGACY_PROCESSING);
        assert_eq!(legacy_status(None), LEGACY_PENDING);
    }

    #[tokio::test]
    async fn test_submit_allocates_smallest_free_task_id() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = spawn_upstream(ocr_upstream()).await;
        let (base, state) = spawn_gateway(test_config(dir.path(), &upstream)).await;
        std::fs::create_dir_all(state.layout().upload_dir("5", "1")).unwrap();
        std::fs::create_dir_all(state.layout().upload_dir("5", "3")).unwrap();

        let response: Value = reqwest::Client::new()
            .post(format!("{}/api/ocr", base))
            .json(&json!({"agentUserId": "5", "file_name": "a.pdf"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(response["ok"], true);
        assert_eq!(response["taskId"], "2");
        assert_eq!(response["jobId"], "ocr:2");
    }

    #[tokio::test]
    async fn test_submit_requires_user_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = spawn_gateway(test_config(dir.path(), "http://127.0.0.1:9")).await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/ocr", base))
            .json(&json!({"file_name": "a.pdf"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_status_reports_failure_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = spawn_upstream(ocr_upstream()).await;
        let (base, state) = spawn_gateway(test_config(dir.path(), &upstream)).await;
        let upload = state.layout().upload_dir("9", "7");
        std::fs::create_dir_all(&upload).unwrap();
        std::fs::write(upload.join("scan.pdf"), b"x").unwrap();

        let response: Value = reqwest::Client::new()
            .get(format!("{}/api/ocr?taskId=7", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(response["status"], LEGACY_FAILED);
        assert_eq!(response["agentUserId"], "9");
        assert_eq!(response["fileName"], "scan.pdf");
        assert_eq!(response["fileExists"], false);
        assert_eq!(response["errorMessage"], "bad scan");
    }

    #[tokio::test]
    async fn test_delete_removes_task_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let (base, state) = spawn_gateway(test_config(dir.path(), "http://127.0.0.1:9")).await;
        let upload = state.layout().upload_dir("9", "4");
        let save = state.layout().save_dir("9", "4");
        std::fs::create_dir_all(&upload).unwrap();
        std::fs::create_dir_all(&save).unwrap();

        let response = reqwest::Client::new()
            .delete(format!("{}/api/ocr?taskId=4", base))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert!(!upload.exists());
        assert!(!save.exists());
    }
}
