//! Upload file naming and task id allocation

use rand::{distributions::Alphanumeric, Rng};
use std::path::Path;

use crate::error::Result;

/// Pick a name that does not exist yet in `dir`: `report.docx`,
/// `report(1).docx`, `report(2).docx`, ...
///
/// The check and the later write are not atomic; two racing uploads can
/// still pick the same name.
pub async fn unique_file_name(dir: &Path, file_name: &str) -> String {
    let path = Path::new(file_name);
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let base = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());

    let mut candidate = file_name.to_string();
    let mut counter = 1u32;
    while tokio::fs::try_exists(dir.join(&candidate)).await.unwrap_or(false) {
        candidate = format!("{}({}){}", base, counter, ext);
        counter += 1;
    }
    candidate
}

async fn numeric_task_dirs(user_dir: &Path) -> Result<Vec<u64>> {
    tokio::fs::create_dir_all(user_dir).await?;

    let mut ids = Vec::new();
    let mut entries = tokio::fs::read_dir(user_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = name.parse::<u64>() {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Upload scheme: one past the largest numeric task directory (`"1"` when none)
pub async fn next_task_id_after_max(user_dir: &Path) -> Result<String> {
    let ids = numeric_task_dirs(user_dir).await?;
    Ok(ids.last().map(|max| max + 1).unwrap_or(1).to_string())
}

/// OCR scheme: the smallest positive id with no directory yet
pub async fn next_free_task_id(user_dir: &Path) -> Result<String> {
    let ids = numeric_task_dirs(user_dir).await?;
    let mut next = 1u64;
    for id in ids {
        if id == next {
            next += 1;
        } else if id > next {
            break;
        }
    }
    Ok(next.to_string())
}

/// Timestamp plus random suffix, e.g. `1718000000000k3j9x0a`
pub fn generate_task_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("{}{}", chrono::Utc::now().timestamp_millis(), suffix)
}
