//! Document-server save callbacks
//!
//! The document server treats any non-zero `error` in the callback answer as
//! a failed save, so every outcome here, including internal failures, is
//! answered with `error: 0` and an `ok` flag.

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::EditorConfig;
use crate::error::{Error, Result};
use crate::storage::{ensure_component, StorageLayout};

/// Callback status: document is ready for saving
pub const STATUS_READY_FOR_SAVE: i64 = 2;
/// Callback status: force-save requested
pub const STATUS_FORCE_SAVE: i64 = 4;

/// Callback body sent by the document server
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Query parameters baked into the callback URL
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackQuery {
    pub file_name: Option<String>,
    pub agent_user_id: Option<String>,
    pub task_id: Option<String>,
    pub sub_dir: Option<String>,
    pub doc_type: Option<String>,
}

/// Answer returned to the document server
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    pub error: u8,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub saved: Option<SavedDocument>,
}

impl CallbackResponse {
    fn acknowledged(status: i64) -> Self {
        Self {
            error: 0,
            ok: true,
            status: Some(status),
            message: None,
            saved: None,
        }
    }

    fn saved(saved: SavedDocument) -> Self {
        Self {
            error: 0,
            ok: true,
            status: None,
            message: None,
            saved: Some(saved),
        }
    }

    fn soft_fail(message: String) -> Self {
        Self {
            error: 0,
            ok: false,
            status: None,
            message: Some(message),
            saved: None,
        }
    }
}

/// Where a saved-back document landed
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedDocument {
    pub file_name: String,
    pub saved_path: String,
    pub doc_url: String,
    pub local_url: String,
    pub agent_user_id: Option<String>,
    pub task_id: Option<String>,
    pub sub_dir: String,
}

/// File extension implied by a download's content type
pub fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    const TABLE: &[(&str, &str)] = &[
        ("wordprocessingml", "docx"),
        ("msword", "doc"),
        ("application/pdf", "pdf"),
        ("spreadsheetml.sheet", "xlsx"),
        ("application/vnd.ms-excel", "xls"),
        ("presentationml.presentation", "pptx"),
        ("application/vnd.ms-powerpoint", "ppt"),
    ];
    TABLE
        .iter()
        .find(|(needle, _)| content_type.contains(needle))
        .map(|(_, ext)| *ext)
}

fn has_extension(name: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.[a-zA-Z0-9]+$").expect("Invalid regex"))
        .is_match(name)
}

/// Name to persist: custom name, then title, then a key-based fallback.
/// The extension comes from the payload file type, then the content type.
pub fn derive_file_name(
    custom_name: Option<&str>,
    payload: &CallbackPayload,
    content_ext: Option<&str>,
) -> String {
    let raw = custom_name
        .filter(|n| !n.is_empty())
        .or(payload.title.as_deref().filter(|t| !t.is_empty()))
        .unwrap_or_default();

    if !raw.is_empty() && has_extension(raw) {
        return raw.to_string();
    }

    let ext = payload
        .file_type
        .as_deref()
        .filter(|t| !t.is_empty())
        .or(content_ext)
        .unwrap_or("docx")
        .to_lowercase();
    let base = if !raw.is_empty() {
        raw.to_string()
    } else if let Some(key) = payload.key.as_deref().filter(|k| !k.is_empty()) {
        format!("document_{}", key)
    } else {
        format!("document_{}", chrono::Utc::now().timestamp_millis())
    };
    format!("{}.{}", base, ext)
}

fn is_spreadsheet(file_type: Option<&str>, content_ext: Option<&str>, doc_type: Option<&str>) -> bool {
    let spreadsheet_ext = |e: &str| matches!(e.to_lowercase().as_str(), "xlsx" | "xls");
    file_type.is_some_and(spreadsheet_ext)
        || content_ext.is_some_and(spreadsheet_ext)
        || doc_type.is_some_and(|d| d.eq_ignore_ascii_case("spreadsheet"))
}

/// Persists edited documents handed back by the document server
#[derive(Clone)]
pub struct EditorBridge {
    client: Client,
    layout: StorageLayout,
    editor: EditorConfig,
}

impl EditorBridge {
    pub fn new(layout: StorageLayout, editor: EditorConfig, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            layout,
            editor,
        }
    }

    /// Handle one callback. Never fails.
    pub async fn handle(&self, payload: CallbackPayload, query: CallbackQuery) -> CallbackResponse {
        let status = payload.status.unwrap_or(0);
        if status != STATUS_READY_FOR_SAVE && status != STATUS_FORCE_SAVE {
            tracing::debug!(status, "Callback acknowledged without action");
            return CallbackResponse::acknowledged(status);
        }

        match self.save_back(&payload, &query).await {
            Ok(saved) => {
                tracing::info!(path = %saved.saved_path, "Saved edited document");
                CallbackResponse::saved(saved)
            }
            Err(e) => {
                tracing::warn!(error = %e, key = ?payload.key, "Editor save-back failed");
                CallbackResponse::soft_fail(e.to_string())
            }
        }
    }

    async fn save_back(&self, payload: &CallbackPayload, query: &CallbackQuery) -> Result<SavedDocument> {
        let url = payload
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::invalid("Missing url in callback payload"))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::unreachable("document_server", e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::rejected(
                "document_server",
                status.as_u16(),
                format!("Failed to download file: {}", status),
            ));
        }

        let content_ext = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(extension_from_content_type);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::unreachable("document_server", e.to_string()))?;

        let file_name = derive_file_name(query.file_name.as_deref(), payload, content_ext);
        let file_name = ensure_component("fileName", &file_name)?.to_string();

        let sub_dir = match query.sub_dir.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(dir) => ensure_component("subDir", dir)?.to_string(),
            None if is_spreadsheet(payload.file_type.as_deref(), content_ext, query.doc_type.as_deref()) => {
                "table".to_string()
            }
            None => String::new(),
        };

        let user = query.agent_user_id.as_deref().filter(|u| !u.is_empty());
        let task = query.task_id.as_deref().filter(|t| !t.is_empty());
        let mut parts: Vec<&str> = Vec::new();
        if let (Some(user), Some(task)) = (user, task) {
            parts.push(ensure_component("agentUserId", user)?);
            parts.push(ensure_component("taskId", task)?);
        }
        if !sub_dir.is_empty() {
            parts.push(&sub_dir);
        }

        let mut dir: PathBuf = self.layout.save_root();
        for part in &parts {
            dir.push(part);
        }
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(&file_name), &bytes).await?;

        parts.push(&file_name);
        let relative = self.layout.save_url(&parts);

        Ok(SavedDocument {
            local_url: format!("{}{}", self.editor.public_base, relative),
            doc_url: format!("{}{}", self.editor.ds_base(), relative),
            saved_path: relative,
            file_name,
            agent_user_id: user.map(str::to_string),
            task_id: task.map(str::to_string),
            sub_dir,
        })
    }
}
