//! Local link targets rewritten into uploaded documents

use serde::Serialize;
use std::path::Path;

use crate::config::EditorConfig;
use crate::editor::OFFICE_EXTENSIONS;
use crate::storage::{encode_query, encode_segment, StorageLayout, SAVE_DIR, UPLOAD_DIR};

/// What an `/open?target=` link points at
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OpenTarget {
    pub found: bool,
    pub target: String,
    pub base_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    pub is_office: bool,
    /// URL the browser or document server fetches the file from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    /// Editor page for office files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editor_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Look a link target up by its base name directly under `upload/` and `save/`.
///
/// Only the final path component of the target is used, so a link can never
/// reach outside those two roots.
pub async fn describe_open_target(layout: &StorageLayout, editor: &EditorConfig, target: &str) -> OpenTarget {
    let base_name = target
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .to_string();

    let mut described = OpenTarget {
        found: false,
        target: target.to_string(),
        base_name: base_name.clone(),
        relative_path: None,
        is_office: false,
        file_url: None,
        editor_url: None,
        agent_user_id: None,
        task_id: None,
    };
    if base_name.is_empty() || base_name == "." || base_name == ".." {
        return described;
    }

    for dir in [UPLOAD_DIR, SAVE_DIR] {
        let candidate = layout.public_root().join(dir).join(&base_name);
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            continue;
        }

        let relative = format!("/{}/{}", dir, encode_segment(&base_name));
        let is_office = Path::new(&base_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|e| OFFICE_EXTENSIONS.contains(&e.as_str()));

        described.found = true;
        described.is_office = is_office;
        if is_office {
            let doc_url = format!("{}/files{}", editor.ds_base(), relative);
            described.editor_url = Some(format!(
                "{}/pdf-ocr-editor?{}",
                editor.public_base,
                encode_query(&[("docUrl", doc_url.as_str()), ("docName", base_name.as_str())])
            ));
            described.file_url = Some(doc_url);
        } else {
            described.file_url = Some(format!("{}/files{}", editor.public_base, relative));
        }
        described.relative_path = Some(relative);
        break;
    }

    if !described.found {
        tracing::debug!(target, "Open target not found");
    }
    described
}
