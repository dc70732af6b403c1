//! Parsed-document results written by the pipeline service

use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::blocks::{block_items, block_stats, BlockResolver, BlockStats, DocumentDetails};
use super::metadata::{read_metadata, write_metadata, ElementCounts};
use super::registry::PARSED_MARKER_SUFFIX;
use crate::error::Result;
use crate::storage::{ensure_component, StorageLayout};

const DEFAULT_RESULT_FILE: &str = "blocks_merge.json";
const FALLBACK_RESULT_FILE: &str = "tables_with_heading.json";

/// Where a lookup searched when no result file exists yet
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MissingResult {
    pub path: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tried_paths: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_files: Option<Vec<String>>,
}

/// A loaded result document
#[derive(Debug, Clone)]
pub struct ParsedResult {
    pub source: PathBuf,
    pub data: Value,
    /// Present when the document holds a block list
    pub stats: Option<BlockStats>,
    pub details: DocumentDetails,
}

/// Locate the result file of a task directory.
///
/// With a file name the primary candidate is `<stem>_blocks_merge.json`,
/// falling back to `tables_with_heading.json` and then to the first file
/// carrying the parsed marker suffix. Without one only `blocks_merge.json`
/// is tried.
pub async fn locate_result(task_dir: &Path, file_name: Option<&str>) -> std::result::Result<PathBuf, MissingResult> {
    let stem = file_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .and_then(|n| Path::new(n).file_stem())
        .map(|s| s.to_string_lossy().into_owned());

    let primary = match &stem {
        Some(stem) => task_dir.join(format!("{}_{}", stem, DEFAULT_RESULT_FILE)),
        None => task_dir.join(DEFAULT_RESULT_FILE),
    };
    if is_file(&primary).await {
        return Ok(primary);
    }

    let display = primary.display().to_string();
    if stem.is_none() {
        return Err(MissingResult {
            path: display,
            tried_paths: Vec::new(),
            available_files: None,
        });
    }

    let fallback = task_dir.join(FALLBACK_RESULT_FILE);
    if is_file(&fallback).await {
        return Ok(fallback);
    }
    let tried_paths = vec![display.clone(), fallback.display().to_string()];

    let available = match list_names(task_dir).await {
        Some(names) => names,
        None => {
            return Err(MissingResult {
                path: display,
                tried_paths,
                available_files: None,
            })
        }
    };
    if let Some(found) = available.iter().find(|n| n.contains(PARSED_MARKER_SUFFIX)) {
        return Ok(task_dir.join(found));
    }

    Err(MissingResult {
        path: display,
        tried_paths,
        available_files: Some(available),
    })
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn list_names(dir: &Path) -> Option<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Some(names)
}

/// Merge element counts, page count and file size into the sidecar.
///
/// Returns whether the sidecar was rewritten.
pub async fn sync_metadata(task_dir: &Path, stats: BlockStats) -> Result<bool> {
    let mut meta = read_metadata(task_dir).await.unwrap_or_default();

    let mut size_kb = meta.file_size_kb.filter(|kb| *kb > 0.0);
    if size_kb.is_none() {
        if let Some(file) = meta.physical_file() {
            if let Ok(stat) = tokio::fs::metadata(task_dir.join(file)).await {
                size_kb = Some((stat.len() as f64 / 1024.0 * 100.0).round() / 100.0);
            }
        }
    }

    let counts = ElementCounts {
        text: stats.text,
        tables: stats.tables,
        images: stats.images,
    };
    let changed = meta.element_counts != Some(counts)
        || meta.pages != Some(stats.pages)
        || (size_kb.is_some() && meta.file_size_kb != size_kb);
    if !changed {
        return Ok(false);
    }

    meta.element_counts = Some(counts);
    meta.pages = Some(stats.pages);
    if size_kb.is_some() {
        meta.file_size_kb = size_kb;
    }
    write_metadata(task_dir, &meta).await?;
    tracing::info!(dir = %task_dir.display(), "Updated document statistics");
    Ok(true)
}

/// Load the parsed result of a task and refresh its sidecar statistics
pub async fn load_result(
    layout: &StorageLayout,
    user: &str,
    task_id: &str,
    file_name: Option<&str>,
) -> Result<std::result::Result<ParsedResult, MissingResult>> {
    let user = ensure_component("agentUserId", user)?;
    let task_id = ensure_component("taskId", task_id)?;
    let task_dir = layout.save_dir(user, task_id);

    let source = match locate_result(&task_dir, file_name).await {
        Ok(path) => path,
        Err(missing) => {
            tracing::debug!(user, task_id, path = %missing.path, "Result file not found");
            return Ok(Err(missing));
        }
    };

    let bytes = tokio::fs::read(&source).await?;
    let data: Value = serde_json::from_slice(&bytes)?;

    let meta = read_metadata(&task_dir).await;
    let physical = meta
        .as_ref()
        .and_then(|m| m.physical_file())
        .or(file_name)
        .unwrap_or_default()
        .to_string();

    let (stats, details) = match block_items(&data) {
        Some(items) => {
            let stats = block_stats(items);
            if let Err(e) = sync_metadata(&task_dir, stats).await {
                tracing::warn!(user, task_id, error = %e, "Failed to update metadata statistics");
            }
            let details = BlockResolver::new(user, task_id, &physical).details(items);
            (Some(stats), details)
        }
        None => (None, DocumentDetails::default()),
    };

    Ok(Ok(ParsedResult {
        source,
        data,
        stats,
        details,
    }))
}
