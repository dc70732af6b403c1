//! Document management endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::required_param;
use crate::documents::{list_resources, DocumentStatus, DocumentSummary, ExportRequest, TaskResources};
use crate::error::Result;
use crate::jobs::{JobRegistry, JobState};
use crate::server::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub agent_user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    pub agent_user_id: Option<String>,
    pub task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameBody {
    pub agent_user_id: Option<String>,
    pub task_id: Option<String>,
    pub new_file_name: Option<String>,
}

/// Overlay the live job state on a document the disk still reports pending
fn overlay_job_status(doc: &mut DocumentSummary, user: &str, jobs: &JobRegistry) {
    if doc.status != DocumentStatus::Pending {
        return;
    }
    let Some(job) = jobs.latest_for_task(&doc.id) else {
        return;
    };
    if job.agent_user_id.as_deref().is_some_and(|owner| owner != user) {
        return;
    }
    doc.status = match job.state {
        JobState::Failed | JobState::TimedOut => DocumentStatus::Failed,
        JobState::Completed | JobState::Idle => return,
        JobState::Dispatched | JobState::Polling => DocumentStatus::Processing,
    };
}

/// GET /api/document/list - Documents of a user, newest task first
pub async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Value>> {
    let user = query
        .agent_user_id
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or(state.default_user());

    let mut documents = state.documents().list(user).await?;
    for doc in &mut documents {
        overlay_job_status(doc, user, state.jobs());
    }

    Ok(Json(json!({ "ok": true, "data": documents })))
}

/// POST /api/document/rename - Virtual rename through the sidecar
pub async fn rename_document(
    State(state): State<AppState>,
    Json(body): Json<RenameBody>,
) -> Result<Json<Value>> {
    let user = required_param(&body.agent_user_id, "agentUserId")?;
    let task_id = required_param(&body.task_id, "taskId")?;
    let new_name = required_param(&body.new_file_name, "newFileName")?;

    let outcome = state.documents().rename(user, task_id, new_name).await?;
    Ok(Json(json!({
        "ok": true,
        "message": "Document renamed",
        "data": outcome,
    })))
}

/// DELETE /api/document - Remove a document's task directories
pub async fn delete_document(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Value>> {
    let user = required_param(&query.agent_user_id, "agentUserId")?;
    let task_id = required_param(&query.task_id, "taskId")?;

    state.documents().delete(user, task_id).await?;
    Ok(Json(json!({
        "ok": true,
        "message": format!("Document {} deleted", task_id),
    })))
}

/// POST /api/document/export - Write an export file and return its download URL
pub async fn export_document(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Result<Json<Value>> {
    let outcome = state.exporter().export(&request).await?;
    Ok(Json(json!({ "ok": true, "data": outcome })))
}

/// GET /api/resources - Images and tables extracted for a task
pub async fn resources(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<TaskResources>> {
    let user = required_param(&query.agent_user_id, "agentUserId")?;
    let task_id = required_param(&query.task_id, "taskId")?;
    Ok(Json(list_resources(state.layout(), user, task_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{EventHub, JobKind};
    use crate::server::tests::{spawn_gateway, test_config};

    fn summary(id: &str, status: DocumentStatus) -> DocumentSummary {
        serde_json::from_value(json!({
            "id": id,
            "name": "a.docx",
            "customName": null,
            "physicalName": "a.docx",
            "type": "docx",
            "uploadDate": "2024-01-01",
            "status": status,
            "size": "1 KB",
            "pages": 0,
            "elements": {"text": 0, "tables": 0, "images": 0},
            "statistics": {
                "text_blocks_count": 0,
                "tables_count": 0,
                "images_count": 0,
                "total_pages": 0,
                "file_size_kb": 0.0
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_overlay_from_job_registry() {
        let jobs = JobRegistry::new(EventHub::default());
        jobs.register(JobKind::Pipeline, "1", Some("5".to_string()));
        jobs.register(JobKind::Pipeline, "2", Some("5".to_string()));
        jobs.update("pipeline:2", |j| j.state = JobState::Failed);
        jobs.register(JobKind::Pipeline, "4", Some("6".to_string()));

        let mut running = summary("1", DocumentStatus::Pending);
        overlay_job_status(&mut running, "5", &jobs);
        assert_eq!(running.status, DocumentStatus::Processing);

        let mut failed = summary("2", DocumentStatus::Pending);
        overlay_job_status(&mut failed, "5", &jobs);
        assert_eq!(failed.status, DocumentStatus::Failed);

        let mut done = summary("1", DocumentStatus::Completed);
        overlay_job_status(&mut done, "5", &jobs);
        assert_eq!(done.status, DocumentStatus::Completed);

        let mut other_user = summary("4", DocumentStatus::Pending);
        overlay_job_status(&mut other_user, "5", &jobs);
        assert_eq!(other_user.status, DocumentStatus::Pending);
    }

    #[tokio::test]
    async fn test_rename_list_delete_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (base, state) = spawn_gateway(test_config(dir.path(), "http://127.0.0.1:9")).await;
        let task = state.layout().save_dir("5", "3");
        std::fs::create_dir_all(&task).unwrap();
        std::fs::write(task.join("report.docx"), b"docx").unwrap();
        let client = reqwest::Client::new();

        let renamed: Value = client
            .post(format!("{}/api/document/rename", base))
            .json(&json!({"agentUserId": "5", "taskId": "3", "newFileName": "合同.docx"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(renamed["data"]["customName"], "合同");
        assert_eq!(renamed["data"]["physicalFile"], "report.docx");

        let listed: Value = client
            .get(format!("{}/api/document/list?agentUserId=5", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed["data"][0]["id"], "3");
        assert_eq!(listed["data"][0]["customName"], "合同");

        let deleted = client
            .delete(format!("{}/api/document?agentUserId=5&taskId=3", base))
            .send()
            .await
            .unwrap();
        assert!(deleted.status().is_success());
        assert!(!task.exists());

        let again = client
            .delete(format!("{}/api/document?agentUserId=5&taskId=3", base))
            .send()
            .await
            .unwrap();
        assert_eq!(again.status(), 404);
    }

    #[tokio::test]
    async fn test_export_is_downloadable() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = spawn_gateway(test_config(dir.path(), "http://127.0.0.1:9")).await;
        let client = reqwest::Client::new();

        let exported: Value = client
            .post(format!("{}/api/document/export", base))
            .json(&json!({
                "agentUserId": "5",
                "taskId": "3",
                "fileName": "report.docx",
                "format": "markdown",
                "contentTypes": ["text"],
                "content": {"text": [{"content": "hello"}], "tables": [], "images": []}
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let url = exported["data"]["downloadUrl"].as_str().unwrap().to_string();
        assert!(url.starts_with("/api/file-proxy?path=/my-doc-system-uploads/exports/5/3/report_export_"));

        let download = client.get(format!("{}{}", base, url)).send().await.unwrap();
        assert!(download.status().is_success());
        assert!(download.text().await.unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn test_resources_require_task() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = spawn_gateway(test_config(dir.path(), "http://127.0.0.1:9")).await;
        let client = reqwest::Client::new();

        let missing = client
            .get(format!("{}/api/resources?agentUserId=5", base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 400);

        let empty: Value = client
            .get(format!("{}/api/resources?agentUserId=5&taskId=9", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(empty, json!({"images": [], "tables": []}));
    }
}
