//! Upload endpoint

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;
use std::path::Path;

use super::ocr::{ocr_request, watch_ocr};
use crate::error::{Error, Result};
use crate::gateway::{next_task_id_after_max, rewrite_docx_hyperlinks, unique_file_name};
use crate::server::state::AppState;
use crate::storage::ensure_component;

/// User id of uploads that carry none
const UPLOAD_DEFAULT_USER: &str = "default";

/// Response of a stored upload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub ok: bool,
    pub file_name: String,
    pub saved_path: String,
    pub doc_url: String,
    pub local_url: String,
    pub callback_url: String,
    pub agent_user_id: String,
    pub task_id: String,
    /// Job tracking the best-effort OCR run, when one was accepted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_job_id: Option<String>,
}

fn is_docx(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("docx"))
}

/// Drop any directory part a browser may send along with the file name
fn client_file_name(raw: &str) -> String {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." {
        format!("upload_{}", uuid::Uuid::new_v4())
    } else {
        name.to_string()
    }
}

/// POST /api/upload - Store a file under `upload/<user>/<task>/` and start OCR
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut user: Option<String> = None;
    let mut task_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::invalid(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = client_file_name(field.file_name().unwrap_or(""));
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| Error::invalid(format!("Failed to read file {}: {}", file_name, e)))?;
                file = Some((file_name, data.to_vec()));
            }
            "agentUserId" | "taskId" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| Error::invalid(format!("Failed to read {}: {}", name, e)))?;
                let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
                if name == "agentUserId" {
                    user = value;
                } else {
                    task_id = value;
                }
            }
            _ => {}
        }
    }

    let (original_name, mut data) = file.ok_or_else(|| Error::invalid("No file provided"))?;
    let user = user.unwrap_or_else(|| UPLOAD_DEFAULT_USER.to_string());
    let user = ensure_component("agentUserId", &user)?.to_string();
    let layout = state.layout();

    let task_id = match task_id {
        Some(id) => ensure_component("taskId", &id)?.to_string(),
        None => next_task_id_after_max(&layout.user_upload_dir(&user)).await?,
    };

    let dir = layout.upload_dir(&user, &task_id);
    tokio::fs::create_dir_all(&dir).await?;
    let file_name = unique_file_name(&dir, &original_name).await;

    if is_docx(&file_name) {
        match rewrite_docx_hyperlinks(&data) {
            Ok(Some(rewritten)) => {
                tracing::info!(file = %file_name, "Rewrote local hyperlinks");
                data = rewritten;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(file = %file_name, error = %e, "Hyperlink rewrite failed, storing original"),
        }
    }

    tokio::fs::write(dir.join(&file_name), &data).await?;
    tracing::info!(user = %user, task_id = %task_id, file = %file_name, bytes = data.len(), "Upload stored");

    let ocr_job_id = start_ocr(&state, &user, &task_id, &file_name).await;

    let editor = &state.config().editor;
    let relative = layout.upload_url(&user, &task_id, &file_name);
    Ok(Json(UploadResponse {
        ok: true,
        saved_path: relative.clone(),
        doc_url: format!("{}{}", editor.ds_base(), relative),
        local_url: format!("{}{}", editor.public_base, relative),
        callback_url: format!("{}/api/onlyoffice-callback", editor.ds_base()),
        file_name,
        agent_user_id: user,
        task_id,
        ocr_job_id,
    }))
}

/// Submit the upload to OCR. Never fails the upload.
async fn start_ocr(state: &AppState, user: &str, task_id: &str, file_name: &str) -> Option<String> {
    let request = match ocr_request(state, user, task_id, file_name, None) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(task_id, error = %e, "Cannot build OCR request for upload");
            return None;
        }
    };

    match state.client().submit_ocr(&request).await {
        Ok(_) => watch_ocr(state, user, task_id, file_name).await,
        Err(e) => {
            tracing::warn!(task_id, error = %e, "OCR dispatch after upload failed");
            None
        }
    }
}
