//! Proxied file access: downloads, images, JSON content and local links

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;

use crate::error::{Error, Result};
use crate::gateway::{
    content_type_for, describe_open_target, image_content_type, resolve_allowed_content_path,
    resolve_file_proxy_path, resolve_image_proxy_path, OpenTarget,
};
use crate::server::state::AppState;
use crate::storage::encode_segment;

/// Download names chosen by users, keyed by public-relative path
const DISPLAY_NAMES_FILE: &str = "metadata/file-names.json";
const UPLOADS_ALIAS: &str = "/my-doc-system-uploads";

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenQuery {
    pub target: Option<String>,
}

fn required_path(query: &PathQuery) -> Result<&str> {
    query
        .path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::invalid("Path parameter is required"))
}

async fn read_existing(path: &Path) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::not_found(format!("File not found: {}", path.display())))
        }
        Err(e) => Err(e.into()),
    }
}

/// Display name recorded for a download, keeping the real extension
async fn download_name(state: &AppState, requested: &str, path: &Path) -> String {
    let fallback = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());

    let Ok(raw) = tokio::fs::read(state.layout().public_root().join(DISPLAY_NAMES_FILE)).await else {
        return fallback;
    };
    let Ok(names) = serde_json::from_slice::<Value>(&raw) else {
        tracing::debug!("Ignoring unreadable display-name table");
        return fallback;
    };

    let key = requested.strip_prefix(UPLOADS_ALIAS).unwrap_or(requested);
    match names
        .get("files")
        .and_then(|f| f.get(key))
        .and_then(|m| m.get("displayName"))
        .and_then(Value::as_str)
    {
        Some(display) => {
            let ext = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            if display.ends_with(&ext) {
                display.to_string()
            } else {
                format!("{}{}", display, ext)
            }
        }
        None => fallback,
    }
}

/// GET /api/file-proxy - Download an allow-listed file as an attachment
pub async fn file_proxy(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Response> {
    let requested = required_path(&query)?;
    let path = resolve_file_proxy_path(requested, state.layout())?;
    let bytes = read_existing(&path).await?;
    let name = download_name(&state, requested, &path).await;

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Serving file download");

    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&path)),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", encode_segment(&name)),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// GET /api/image-proxy - Serve an image from the save root
pub async fn image_proxy(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Response> {
    let requested = required_path(&query)?;
    let path = resolve_image_proxy_path(requested, state.layout(), state.translator())?;
    let bytes = read_existing(&path).await?;
    let content_type = image_content_type(&path).unwrap_or("application/octet-stream");

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=60"),
        ],
        bytes,
    )
        .into_response())
}

/// GET /api/file-content - Read an allow-listed file, as JSON when it parses
pub async fn file_content(Query(query): Query<PathQuery>) -> Result<Json<Value>> {
    let requested = required_path(&query)?;
    let path = resolve_allowed_content_path(requested)?;
    let bytes = read_existing(&path).await?;

    let data = match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => value,
        Err(_) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
    };
    Ok(Json(json!({ "ok": true, "data": data })))
}

/// GET /open - Describe the local file a rewritten hyperlink points at
pub async fn open_target(
    State(state): State<AppState>,
    Query(query): Query<OpenQuery>,
) -> Json<OpenTarget> {
    let target = query.target.unwrap_or_default();
    Json(describe_open_target(state.layout(), &state.config().editor, target.trim()).await)
}
