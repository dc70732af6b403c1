//! Schema generation, entity extraction and schema artifacts

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{required_param, user_of};
use crate::dispatch::{user_id_value, ExtractRequest, QuickExtractRequest, SchemaGenerateRequest};
use crate::error::Result;
use crate::gateway::generate_task_id;
use crate::jobs::{JobKind, WatchRequest};
use crate::schema::SchemaKind;
use crate::server::state::AppState;
use crate::storage::{ensure_component, OUTPUT_DIR};

fn status_or_zero(status: Value) -> Value {
    if status.is_null() {
        Value::from(0)
    } else {
        status
    }
}

/// Register and watch an artifact-backed job; failures are only logged
async fn watch_artifact(state: &AppState, kind: JobKind, user: &str, task_id: &str) -> String {
    let request = WatchRequest {
        task_id: task_id.to_string(),
        agent_user_id: Some(user.to_string()),
        file_name: None,
        query_id: None,
    };
    match state.watcher().watch(kind, &request).await {
        Ok(snapshot) => snapshot.job_id,
        Err(e) => {
            tracing::warn!(task_id, kind = kind.as_str(), error = %e, "Failed to watch job");
            kind.job_id(task_id)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateSchemaBody {
    pub task_id: Option<String>,
    #[serde(default)]
    pub status: Value,
    #[serde(rename = "agentUserId", default)]
    pub agent_user_id: Value,
    pub content_file: Option<String>,
    #[serde(default)]
    pub schema_map_file: Option<String>,
}

/// POST /api/extraction/schema/generate - Dispatch schema generation
pub async fn generate_schema(
    State(state): State<AppState>,
    Json(body): Json<GenerateSchemaBody>,
) -> Result<Json<Value>> {
    let task_id = ensure_component("task_id", required_param(&body.task_id, "task_id")?)?.to_string();
    let content_file = required_param(&body.content_file, "content_file")?;
    let user = user_of(&body.agent_user_id, state.default_user());
    let translator = state.translator();

    let request = SchemaGenerateRequest {
        task_id: task_id.clone(),
        status: status_or_zero(body.status),
        agent_user_id: user_id_value(&user),
        content_file: translator.to_host_lossy(content_file),
        schema_map_file: translator.to_host_lossy(body.schema_map_file.as_deref().unwrap_or_default()),
    };
    state.client().generate_schema(&request).await?;
    tracing::info!(task_id = %task_id, user = %user, "Schema generation dispatched");

    let job_id = watch_artifact(&state, JobKind::Schema, &user, &task_id).await;
    Ok(Json(json!({
        "success": true,
        "message": "Schema generation started",
        "jobId": job_id,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ExtractBody {
    pub task_id: Option<String>,
    #[serde(default)]
    pub status: Value,
    #[serde(rename = "agentUserId", default)]
    pub agent_user_id: Value,
    /// Content file path
    pub content: Option<String>,
    /// Schema file path
    pub schema_map: Option<String>,
}

/// POST /api/extraction/extract - Dispatch entity extraction
pub async fn extract(
    State(state): State<AppState>,
    Json(body): Json<ExtractBody>,
) -> Result<Json<Value>> {
    let task_id = ensure_component("task_id", required_param(&body.task_id, "task_id")?)?.to_string();
    let content = required_param(&body.content, "content")?;
    let schema_map = required_param(&body.schema_map, "schema_map")?;
    let user = user_of(&body.agent_user_id, state.default_user());
    let user = ensure_component("agentUserId", &user)?.to_string();

    let output_root = state.layout().data_root().join(OUTPUT_DIR);
    // The service appends the user itself; the directory is prepared for reading results
    tokio::fs::create_dir_all(output_root.join(&user)).await?;

    let translator = state.translator();
    let request = ExtractRequest {
        task_id: task_id.clone(),
        status: status_or_zero(body.status),
        agent_user_id: user_id_value(&user),
        content_file: translator.to_host_lossy(content),
        schema_map_for_entity_file: translator.to_host_lossy(schema_map),
        output_json_file: translator.to_host(&output_root.to_string_lossy())?,
    };
    let backend_response = state.client().extract(&request).await?;
    tracing::info!(task_id = %task_id, user = %user, "Extraction dispatched");

    let job_id = watch_artifact(&state, JobKind::Extract, &user, &task_id).await;
    Ok(Json(json!({
        "success": true,
        "message": "Extraction started successfully",
        "jobId": job_id,
        "backendResponse": backend_response,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickExtractBody {
    pub task_id: Option<String>,
    #[serde(default)]
    pub agent_user_id: Value,
    #[serde(default)]
    pub content: String,
    pub schema_map: Option<String>,
    pub output_json_file: Option<String>,
}

/// POST /api/extract - Extraction over inline content
pub async fn quick_extract(
    State(state): State<AppState>,
    Json(body): Json<QuickExtractBody>,
) -> Result<Json<Value>> {
    let task_id = body
        .task_id
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(generate_task_id);
    let user = user_of(&body.agent_user_id, state.default_user());

    let request = QuickExtractRequest {
        task_id,
        status: 0,
        agent_user_id: user_id_value(&user),
        content: body.content,
        schema_map: body.schema_map.unwrap_or_else(|| "{}".to_string()),
        output_json_file: body.output_json_file.unwrap_or_else(|| "/tmp/output".to_string()),
    };
    let data = state.client().extract_quick(&request).await?;
    Ok(Json(json!({ "ok": true, "data": data })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaQuery {
    pub task_id: Option<String>,
    pub agent_user_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// GET /api/extraction/schema - Saved, generated or result artifact of a task
pub async fn get_schema(
    State(state): State<AppState>,
    Query(query): Query<SchemaQuery>,
) -> Result<Json<Value>> {
    let task_id = required_param(&query.task_id, "taskId")?;
    let user = query
        .agent_user_id
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or(state.default_user());
    let kind = SchemaKind::parse(query.kind.as_deref())?;

    Ok(Json(state.schemas().load(kind, user, task_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CheckFileBody {
    pub task_id: Option<String>,
    #[serde(rename = "agentUserId", default)]
    pub agent_user_id: Value,
    #[serde(rename = "schemaData", default)]
    pub schema_data: Option<Value>,
}

/// POST /api/debug/check-file - Save an edited schema and report where it lives
pub async fn check_file(
    State(state): State<AppState>,
    Json(body): Json<CheckFileBody>,
) -> Result<Json<Value>> {
    let task_id = required_param(&body.task_id, "task_id")?;
    let user = user_of(&body.agent_user_id, state.default_user());

    let saved = state
        .schemas()
        .save(&user, task_id, body.schema_data.as_ref().filter(|v| !v.is_null()))
        .await?;
    let host_path = state.translator().to_host_lossy(&saved.full_path);
    let message = if saved.exists {
        "Schema file is present"
    } else {
        "Schema file does not exist"
    };

    Ok(Json(json!({
        "success": true,
        "data": {
            "taskId": saved.task_id,
            "fullPath": saved.full_path,
            "hostPath": host_path,
            "exists": saved.exists,
            "fileSize": saved.file_size,
            "userId": saved.user_id,
            "message": message,
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::spawn_upstream;
    use crate::server::tests::{spawn_gateway, test_config};
    use axum::{routing::post, Router};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_extract_translates_paths_and_watches() {
        let seen = Arc::new(Mutex::new(Value::Null));
        let captured = Arc::clone(&seen);
        let upstream = spawn_upstream(Router::new().route(
            "/extract_Attribute/",
            post(move |Json(body): Json<Value>| {
                let captured = Arc::clone(&captured);
                async move {
                    *captured.lock().unwrap() = body;
                    Json(json!({"accepted": true}))
                }
            }),
        ))
        .await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), &upstream);
        let (base, state) = spawn_gateway(config).await;
        let data_root = state.layout().data_root().to_string_lossy().into_owned();

        let response: Value = reqwest::Client::new()
            .post(format!("{}/api/extraction/extract", base))
            .json(&json!({
                "task_id": "8",
                "agentUserId": 123,
                "content": format!("{}/content.md", data_root),
                "schema_map": "/elsewhere/schema.json",
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(response["success"], true);
        assert_eq!(response["jobId"], "extract:8");
        assert_eq!(response["backendResponse"]["accepted"], true);

        let body = seen.lock().unwrap().clone();
        assert_eq!(body["content_file"], "/host/data/content.md");
        assert_eq!(body["schema_map_forEnti_file"], "/elsewhere/schema.json");
        assert_eq!(body["output_json_file"], "/host/data/output");
        assert_eq!(body["agentUserId"], 123);
        assert!(state.layout().data_root().join("output/123").is_dir());
        assert!(state.jobs().get("extract:8").is_some());
    }

    #[tokio::test]
    async fn test_schema_missing_then_saved() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = spawn_gateway(test_config(dir.path(), "http://127.0.0.1:9")).await;
        let client = reqwest::Client::new();

        let missing = client
            .get(format!("{}/api/extraction/schema?taskId=3", base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
        let body: Value = missing.json().await.unwrap();
        assert_eq!(body["found"], false);

        let saved: Value = client
            .post(format!("{}/api/debug/check-file", base))
            .json(&json!({"task_id": "3", "schemaData": {"fields": ["name"]}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(saved["data"]["exists"], true);
        assert_eq!(saved["data"]["hostPath"], "/host/data/extractenti_json/123/3.json");

        let schema: Value = client
            .get(format!("{}/api/extraction/schema?taskId=3&type=saved", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(schema["fields"][0], "name");
    }

    #[tokio::test]
    async fn test_generate_requires_content_file() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = spawn_gateway(test_config(dir.path(), "http://127.0.0.1:9")).await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/extraction/schema/generate", base))
            .json(&json!({"task_id": "1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }
}
