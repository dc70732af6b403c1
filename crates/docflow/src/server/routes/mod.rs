//! API routes of the gateway

pub mod documents;
pub mod editor;
pub mod extraction;
pub mod files;
pub mod jobs;
pub mod ocr;
pub mod pipeline;
pub mod status;
pub mod upload;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::server::state::AppState;

/// Upstream body as a plain string, without the quotes of a JSON string
pub(crate) fn raw_body(body: &Value) -> String {
    match body {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A trimmed, non-empty parameter or a 400
pub(crate) fn required_param<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::invalid(format!("Missing required parameter: {}", name)))
}

/// `agentUserId` arrives as a number or a string
pub(crate) fn user_of(value: &Value, default_user: &str) -> String {
    match value {
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => default_user.to_string(),
    }
}

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // File gateway - larger body limit for uploads
        .route(
            "/upload",
            post(upload::upload).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/file-proxy", get(files::file_proxy))
        .route("/image-proxy", get(files::image_proxy))
        .route("/file-content", get(files::file_content))
        // Dispatch and status
        .route("/ocr", get(ocr::status).post(ocr::submit).delete(ocr::delete))
        .route("/status", get(status::task_status))
        .route("/extraction/schema", get(extraction::get_schema))
        .route("/extraction/schema/generate", post(extraction::generate_schema))
        .route("/extraction/extract", post(extraction::extract))
        .route("/extract", post(extraction::quick_extract))
        .route("/debug/check-file", post(extraction::check_file))
        .route("/pipeline/run_check", post(pipeline::run_check))
        .route("/pipeline/statistics", post(pipeline::statistics))
        .route("/pipeline/status", get(pipeline::status))
        .route("/pipeline/result", get(pipeline::result))
        .route("/storage/run", post(pipeline::storage_run))
        // Document registry
        .route("/resources", get(documents::resources))
        .route("/document", delete(documents::delete_document))
        .route("/document/list", get(documents::list_documents))
        .route("/document/rename", post(documents::rename_document))
        .route("/document/export", post(documents::export_document))
        // Editor bridge
        .route(
            "/onlyoffice-callback",
            get(editor::callback_alive).post(editor::callback),
        )
        .route("/onlyoffice-docurl", get(editor::doc_url))
        // Jobs; the first segment is a job id, or a job kind for watch
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job).delete(jobs::cancel_job))
        .route("/jobs/:id/events", get(jobs::job_events))
        .route("/jobs/:id/watch", post(jobs::watch_job))
        // Info
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> Json<Value> {
    Json(json!({
        "name": "docflow",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Document-knowledge gateway for OCR, parsing, extraction and editing services",
        "endpoints": {
            "POST /api/upload": "Upload a file into a task and start OCR",
            "GET /api/file-proxy": "Download an allow-listed file",
            "GET /api/image-proxy": "Serve an image from the save root",
            "GET /api/file-content": "Read an allow-listed file",
            "GET|POST|DELETE /api/ocr": "OCR status, submission and cleanup",
            "GET /api/status": "Task status from the owning service",
            "GET /api/extraction/schema": "Saved, generated or result schema of a task",
            "POST /api/extraction/schema/generate": "Dispatch schema generation",
            "POST /api/extraction/extract": "Dispatch entity extraction",
            "POST /api/extract": "Extraction over inline content",
            "POST /api/debug/check-file": "Save an edited schema",
            "POST /api/pipeline/run_check": "Start document parsing",
            "POST /api/pipeline/statistics": "Parsing statistics",
            "GET /api/pipeline/status": "Parsing status",
            "GET /api/pipeline/result": "Parsed blocks of a task",
            "POST /api/storage/run": "Import a table into the database",
            "GET /api/resources": "Images and tables of a task",
            "GET /api/document/list": "Documents of a user",
            "POST /api/document/rename": "Rename a document",
            "DELETE /api/document": "Delete a document",
            "POST /api/document/export": "Export parsed content",
            "POST /api/onlyoffice-callback": "Document server save-back",
            "GET /api/onlyoffice-docurl": "Editor session of a task",
            "GET /api/jobs": "Watched jobs",
            "GET|DELETE /api/jobs/:id": "One job, or stop watching it",
            "GET /api/jobs/:id/events": "Job progress as Server-Sent Events",
            "POST /api/jobs/:kind/watch": "Watch a dispatched job"
        }
    }))
}
