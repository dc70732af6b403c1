//! Editor sessions: which file the document server should open for a task

use serde::Serialize;
use std::path::Path;
use std::time::SystemTime;

use crate::config::EditorConfig;
use crate::documents::{read_metadata, METADATA_FILE};
use crate::error::Result;
use crate::storage::{encode_query, ensure_component, StorageLayout};

/// Extensions the document server can edit
pub const OFFICE_EXTENSIONS: &[&str] = &["docx", "xlsx", "pptx", "doc", "xls", "ppt"];

/// URLs handed to the browser to open a task's document
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EditorSession {
    pub doc_url: String,
    /// Virtual name shown in the editor
    pub doc_name: String,
    pub callback_url: String,
    pub relative_path: String,
    pub physical_file_name: String,
}

/// Either a ready session or a task whose document does not exist yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLookup {
    Ready(EditorSession),
    Processing(&'static str),
}

/// Physical file and display name of a task directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDocument {
    pub physical_file: String,
    pub display_name: String,
}

fn is_office_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| OFFICE_EXTENSIONS.contains(&e.as_str()))
}

/// Pick the document of a task directory.
///
/// A sidecar pointing at an existing file wins. Otherwise the most recently
/// modified non-empty office file is used; temporary `~$` files and
/// `.origin.` copies are skipped.
pub async fn resolve_document(task_dir: &Path) -> Option<ResolvedDocument> {
    if let Some(meta) = read_metadata(task_dir).await {
        if let Some(physical) = meta.physical_file() {
            if tokio::fs::try_exists(task_dir.join(physical)).await.unwrap_or(false) {
                let display_name = match meta.display_name() {
                    Some(custom) => format!("{}.docx", custom),
                    None => physical.to_string(),
                };
                return Some(ResolvedDocument {
                    physical_file: physical.to_string(),
                    display_name,
                });
            }
        }
    }

    let mut candidates: Vec<(SystemTime, String)> = Vec::new();
    let mut entries = match tokio::fs::read_dir(task_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %task_dir.display(), error = %e, "Cannot read task directory");
            return None;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("~$") || name == METADATA_FILE || name.contains(".origin.") || !is_office_file(&name) {
            continue;
        }
        // Files may vanish or still be zero bytes while being written
        let Ok(stat) = entry.metadata().await else {
            continue;
        };
        if !stat.is_file() || stat.len() == 0 {
            continue;
        }
        candidates.push((stat.modified().unwrap_or(SystemTime::UNIX_EPOCH), name));
    }

    candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    candidates.into_iter().next().map(|(_, name)| ResolvedDocument {
        display_name: name.clone(),
        physical_file: name,
    })
}

/// Build the editor session of a task
pub async fn open_session(
    layout: &StorageLayout,
    editor: &EditorConfig,
    user: &str,
    task_id: &str,
) -> Result<SessionLookup> {
    let user = ensure_component("agentUserId", user)?;
    let task_id = ensure_component("taskId", task_id)?;
    let task_dir = layout.save_dir(user, task_id);

    let is_dir = tokio::fs::metadata(&task_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Ok(SessionLookup::Processing("Waiting for the document to be generated"));
    }

    let Some(doc) = resolve_document(&task_dir).await else {
        return Ok(SessionLookup::Processing("Document is being processed or no document file was found"));
    };

    let relative_path = layout.save_url(&[user, task_id, &doc.physical_file]);
    let callback_url = format!(
        "{}/api/onlyoffice-callback?{}",
        editor.public_base,
        encode_query(&[
            ("fileName", doc.physical_file.as_str()),
            ("agentUserId", user),
            ("taskId", task_id),
        ])
    );

    tracing::debug!(user, task_id, physical = %doc.physical_file, "Editor session resolved");

    Ok(SessionLookup::Ready(EditorSession {
        doc_url: format!("{}{}", editor.ds_base(), relative_path),
        doc_name: doc.display_name,
        callback_url,
        relative_path,
        physical_file_name: doc.physical_file,
    }))
}
