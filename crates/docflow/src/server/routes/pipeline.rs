//! Parsing pipeline relays, parsed results and database import

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{required_param, user_of};
use crate::dispatch::{user_id_value, ImportRequest, PipelineRequest};
use crate::documents::load_result;
use crate::error::{Error, ErrorKind, Result};
use crate::jobs::{JobKind, WatchRequest};
use crate::server::state::AppState;
use crate::storage::ensure_component;

/// Body shared by run_check, statistics and storage/run
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineBody {
    #[serde(default)]
    pub agent_user_id: Value,
    pub task_id: Option<String>,
    pub file_name: Option<String>,
}

struct PipelineTarget {
    user: String,
    task_id: String,
    file_name: String,
}

fn target_of(body: PipelineBody) -> Result<PipelineTarget> {
    let user = user_of(&body.agent_user_id, "");
    let user = ensure_component("agentUserId", &user)?.to_string();
    let task_id = ensure_component("taskId", required_param(&body.task_id, "taskId")?)?.to_string();
    let file_name = required_param(&body.file_name, "fileName")?.to_string();
    Ok(PipelineTarget {
        user,
        task_id,
        file_name,
    })
}

/// The service joins `input_file_path/<task>/<file>`, so the user is part of the input root
fn pipeline_request(state: &AppState, target: &PipelineTarget) -> Result<PipelineRequest> {
    let layout = state.layout();
    let translator = state.translator();
    Ok(PipelineRequest {
        file_name: target.file_name.clone(),
        task_id: target.task_id.clone(),
        agent_user_id: user_id_value(&target.user),
        input_file_path: translator.to_host(&layout.user_save_dir(&target.user).to_string_lossy())?,
        output_file_path: translator.to_host(&layout.save_root().to_string_lossy())?,
    })
}

/// POST /api/pipeline/run_check - Start parsing; the answer carries the query id
pub async fn run_check(
    State(state): State<AppState>,
    Json(body): Json<PipelineBody>,
) -> Result<Json<Value>> {
    let target = target_of(body)?;
    let request = pipeline_request(&state, &target)?;
    let data = state.client().pipeline_run_check(&request).await?;

    let query_id = data
        .get("query_id")
        .and_then(|q| q.as_str().map(str::to_string).or_else(|| q.as_i64().map(|n| n.to_string())));
    match query_id {
        Some(query_id) => {
            let watch = WatchRequest {
                task_id: target.task_id.clone(),
                agent_user_id: Some(target.user.clone()),
                file_name: Some(target.file_name.clone()),
                query_id: Some(query_id),
            };
            if let Err(e) = state.watcher().watch(JobKind::Pipeline, &watch).await {
                tracing::warn!(task_id = %target.task_id, error = %e, "Failed to watch pipeline job");
            }
        }
        None => tracing::debug!(task_id = %target.task_id, "Pipeline answered without a query id"),
    }

    Ok(Json(data))
}

/// POST /api/pipeline/statistics
pub async fn statistics(
    State(state): State<AppState>,
    Json(body): Json<PipelineBody>,
) -> Result<Json<Value>> {
    let target = target_of(body)?;
    let request = pipeline_request(&state, &target)?;
    Ok(Json(state.client().pipeline_statistics(&request).await?))
}

#[derive(Debug, Deserialize)]
pub struct PipelineStatusQuery {
    pub query_id: Option<String>,
}

/// GET /api/pipeline/status - Relay the pipeline status body as is
pub async fn status(
    State(state): State<AppState>,
    Query(query): Query<PipelineStatusQuery>,
) -> Result<Json<Value>> {
    let query_id = required_param(&query.query_id, "query_id")?;
    let probe = state.client().pipeline_status(query_id).await?;
    Ok(Json(probe.body))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultQuery {
    pub agent_user_id: Option<String>,
    pub task_id: Option<String>,
    pub file_name: Option<String>,
}

/// GET /api/pipeline/result - Parsed blocks with resolved table and image references
pub async fn result(
    State(state): State<AppState>,
    Query(query): Query<ResultQuery>,
) -> Result<Response> {
    let user = required_param(&query.agent_user_id, "agentUserId")?;
    let task_id = required_param(&query.task_id, "taskId")?;
    let file_name = query.file_name.as_deref().map(str::trim).filter(|f| !f.is_empty());

    match load_result(state.layout(), user, task_id, file_name).await? {
        Ok(parsed) => Ok(Json(json!({
            "ok": true,
            "data": parsed.data,
            "stats": parsed.stats,
            "details": parsed.details,
        }))
        .into_response()),
        Err(missing) => {
            let mut body = json!({
                "ok": false,
                "found": false,
                "kind": ErrorKind::NotFound,
                "message": "Result file not found",
            });
            if let (Some(obj), Value::Object(extra)) = (body.as_object_mut(), serde_json::to_value(&missing)?) {
                obj.extend(extra);
            }
            Ok((StatusCode::NOT_FOUND, Json(body)).into_response())
        }
    }
}

/// Reject table JSON names that climb out of the task directory
fn ensure_relative(file_name: &str) -> Result<&str> {
    let escapes = file_name.starts_with('/')
        || file_name
            .split(['/', '\\'])
            .any(|part| part == ".." || part.is_empty());
    if escapes {
        return Err(Error::invalid(format!("Invalid fileName: '{}'", file_name)));
    }
    Ok(file_name)
}

/// POST /api/storage/run - Import a table JSON of a task into the database
pub async fn storage_run(
    State(state): State<AppState>,
    Json(body): Json<PipelineBody>,
) -> Result<Json<Value>> {
    let target = target_of(body)?;
    let file_name = ensure_relative(&target.file_name)?;
    let json_name = if file_name.ends_with(".json") {
        file_name.to_string()
    } else {
        format!("{}.json", file_name)
    };

    let path = state.layout().save_dir(&target.user, &target.task_id).join(json_name);
    let request = ImportRequest {
        json_file_path: state.translator().to_host(&path.to_string_lossy())?,
    };
    tracing::info!(task_id = %target.task_id, path = %request.json_file_path, "Importing table cells");

    Ok(Json(state.client().import_table_cells(&request).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::spawn_upstream;
    use crate::server::tests::{spawn_gateway, test_config};
    use axum::{routing::{get, post}, Router};

    fn pipeline_upstream() -> Router {
        Router::new()
            .route(
                "/pipeline/run_check",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["input_file_path"], "/host/save/5");
                    assert_eq!(body["output_file_path"], "/host/save");
                    assert_eq!(body["agentUserId"], 5);
                    Json(json!({"query_id": "q-1"}))
                }),
            )
            .route(
                "/pipeline/status",
                get(|| async { Json(json!({"status": "running", "percent": 30})) }),
            )
            .route(
                "/import/table_cells",
                post(|Json(body): Json<Value>| async move { Json(json!({"imported": body["json_file_path"]})) }),
            )
    }

    #[test]
    fn test_ensure_relative() {
        assert!(ensure_relative("table/t1").is_ok());
        assert!(ensure_relative("../t1").is_err());
        assert!(ensure_relative("/etc/t1").is_err());
    }

    #[tokio::test]
    async fn test_run_check_registers_pipeline_job() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = spawn_upstream(pipeline_upstream()).await;
        let (base, state) = spawn_gateway(test_config(dir.path(), &upstream)).await;
        let client = reqwest::Client::new();

        let data: Value = client
            .post(format!("{}/api/pipeline/run_check", base))
            .json(&json!({"agentUserId": "5", "taskId": "2", "fileName": "a.docx"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(data["query_id"], "q-1");
        assert!(state.jobs().get("pipeline:2").is_some());

        let status: Value = client
            .get(format!("{}/api/pipeline/status?query_id=q-1", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["percent"], 30);
    }

    #[tokio::test]
    async fn test_storage_run_builds_host_path() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = spawn_upstream(pipeline_upstream()).await;
        let (base, _) = spawn_gateway(test_config(dir.path(), &upstream)).await;

        let data: Value = reqwest::Client::new()
            .post(format!("{}/api/storage/run", base))
            .json(&json!({"agentUserId": 5, "taskId": "2", "fileName": "table/t1"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(data["imported"], "/host/save/5/2/table/t1.json");
    }

    #[tokio::test]
    async fn test_result_missing_reports_tried_paths() {
        let dir = tempfile::tempdir().unwrap();
        let (base, state) = spawn_gateway(test_config(dir.path(), "http://127.0.0.1:9")).await;
        std::fs::create_dir_all(state.layout().save_dir("5", "2")).unwrap();

        let response = reqwest::Client::new()
            .get(format!("{}/api/pipeline/result?agentUserId=5&taskId=2&fileName=a.docx", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["found"], false);
        assert_eq!(body["triedPaths"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_result_resolves_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let (base, state) = spawn_gateway(test_config(dir.path(), "http://127.0.0.1:9")).await;
        let task = state.layout().save_dir("5", "2");
        std::fs::create_dir_all(&task).unwrap();
        std::fs::write(
            task.join("a_blocks_merge.json"),
            json!([
                {"content": "1.1 Scope [#PDF-LOC:1#]"},
                {"content": "{{#T#:t1.xlsx}} [#PDF-LOC:2#]"},
            ])
            .to_string(),
        )
        .unwrap();

        let body: Value = reqwest::Client::new()
            .get(format!("{}/api/pipeline/result?agentUserId=5&taskId=2&fileName=a.docx", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(body["stats"]["tables"], 1);
        assert_eq!(body["stats"]["pages"], 2);
        assert_eq!(body["details"]["tables"][0]["metadata"]["table_path"], "table/t1.xlsx");
    }
}
