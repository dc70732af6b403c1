//! Filesystem-backed document registry
//!
//! A document is a task directory `save/<user>/<task>/`. Its displayed name
//! comes from the `metadata.json` sidecar when one exists; renames only ever
//! touch the sidecar, never the physical file.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use super::metadata::{read_metadata, write_metadata, ElementCounts};
use crate::error::{Error, Result};
use crate::storage::{ensure_component, StorageLayout};

/// Marker suffix written by the parsing pipeline once a document is parsed
pub const PARSED_MARKER_SUFFIX: &str = "_tables_with_heading.json";

/// Derived processing state of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Completed,
    Processing,
    Pending,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentStatistics {
    pub text_blocks_count: u32,
    pub tables_count: u32,
    pub images_count: u32,
    pub total_pages: u32,
    pub file_size_kb: f64,
}

/// One row of the document list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    pub name: String,
    pub custom_name: Option<String>,
    pub physical_name: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub upload_date: String,
    pub status: DocumentStatus,
    pub size: String,
    pub pages: u32,
    pub elements: ElementCounts,
    pub statistics: DocumentStatistics,
}

/// Result of a virtual rename
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenameOutcome {
    pub physical_file: String,
    pub custom_name: String,
}

/// `.docx` files that can stand for a document, in name order
pub async fn scan_docx_files(task_dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(task_dir).await else {
        return names;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".docx")
            && !name.starts_with("~$")
            && !name.contains(".origin.")
            && entry.file_type().await.map(|t| t.is_file()).unwrap_or(false)
        {
            names.push(name);
        }
    }
    names.sort();
    names
}

async fn has_parsed_marker(task_dir: &Path) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(task_dir).await else {
        return false;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().ends_with(PARSED_MARKER_SUFFIX) {
            return true;
        }
    }
    false
}

/// Human-readable size: `B`, `KB` or `MB` with one decimal
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn format_kb(kb: f64) -> String {
    if kb.fract() == 0.0 {
        format!("{} KB", kb as i64)
    } else {
        format!("{} KB", kb)
    }
}

/// `YYYY-MM-DD` of an RFC 3339 timestamp, today when unparseable
fn upload_date(timestamp: Option<&str>) -> String {
    let parsed = timestamp
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    parsed.format("%Y-%m-%d").to_string()
}

/// Numeric descending when every id is an integer, else lexicographic descending
pub fn sort_task_ids<T, F>(items: &mut [T], id_of: F)
where
    F: Fn(&T) -> &str,
{
    let all_numeric = items.iter().all(|i| id_of(i).parse::<u128>().is_ok());
    items.sort_by(|a, b| {
        let (a, b) = (id_of(a), id_of(b));
        if all_numeric {
            match (a.parse::<u128>(), b.parse::<u128>()) {
                (Ok(x), Ok(y)) => y.cmp(&x),
                _ => Ordering::Equal,
            }
        } else {
            b.cmp(a)
        }
    });
}

/// Lists, renames and deletes documents of a user
#[derive(Debug, Clone)]
pub struct DocumentRegistry {
    layout: StorageLayout,
}

impl DocumentRegistry {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    /// All documents of `user`, sorted by task id (newest first)
    pub async fn list(&self, user: &str) -> Result<Vec<DocumentSummary>> {
        let user = ensure_component("agentUserId", user)?;
        let user_dir = self.layout.user_save_dir(user);

        let mut entries = match tokio::fs::read_dir(&user_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let task_id = entry.file_name().to_string_lossy().into_owned();
            if let Some(doc) = self.summarize(&task_id, &entry.path()).await {
                documents.push(doc);
            }
        }

        sort_task_ids(&mut documents, |d| d.id.as_str());
        tracing::debug!(user, count = documents.len(), "Listed documents");
        Ok(documents)
    }

    /// Summary of one task directory; `None` when it holds no document
    pub async fn summarize(&self, task_id: &str, task_dir: &Path) -> Option<DocumentSummary> {
        let meta = read_metadata(task_dir).await;
        let mut physical = meta
            .as_ref()
            .and_then(|m| m.physical_file())
            .map(str::to_string);
        let mut last_modified = meta.as_ref().and_then(|m| m.last_modified.clone());

        if physical.is_none() {
            if let Some(first) = scan_docx_files(task_dir).await.into_iter().next() {
                if let Ok(stat) = tokio::fs::metadata(task_dir.join(&first)).await {
                    if let Ok(modified) = stat.modified() {
                        last_modified = Some(
                            DateTime::<Utc>::from(modified)
                                .to_rfc3339_opts(SecondsFormat::Millis, true),
                        );
                    }
                }
                physical = Some(first);
            }
        }

        if meta.is_none() && physical.is_none() {
            return None;
        }
        let meta = meta.unwrap_or_default();

        let name = match (meta.display_name(), &physical) {
            (Some(custom), _) => format!("{}.docx", custom),
            (None, Some(file)) => file.clone(),
            (None, None) => format!("Untitled-{}", task_id),
        };

        let size = match (meta.file_size_kb, &physical) {
            (Some(kb), _) if kb > 0.0 => format_kb(kb),
            (_, Some(file)) => match tokio::fs::metadata(task_dir.join(file)).await {
                Ok(stat) => format_size(stat.len()),
                Err(_) => "unknown".to_string(),
            },
            _ => "unknown".to_string(),
        };

        let status = if has_parsed_marker(task_dir).await {
            DocumentStatus::Completed
        } else {
            DocumentStatus::Pending
        };

        let counts = meta.element_counts.unwrap_or_default();
        let pages = meta.pages.unwrap_or(0);

        Some(DocumentSummary {
            id: task_id.to_string(),
            name,
            custom_name: meta.display_name().map(str::to_string),
            physical_name: physical,
            doc_type: "DOCX".to_string(),
            upload_date: upload_date(last_modified.as_deref()),
            status,
            size,
            pages,
            elements: counts,
            statistics: DocumentStatistics {
                text_blocks_count: counts.text,
                tables_count: counts.tables,
                images_count: counts.images,
                total_pages: pages,
                file_size_kb: meta.file_size_kb.unwrap_or(0.0),
            },
        })
    }

    /// Virtual rename: records `new_name` in the sidecar only.
    ///
    /// Renaming to the current name leaves the sidecar untouched.
    pub async fn rename(&self, user: &str, task_id: &str, new_name: &str) -> Result<RenameOutcome> {
        let user = ensure_component("agentUserId", user)?;
        let task_id = ensure_component("taskId", task_id)?;
        let task_dir = self.layout.save_dir(user, task_id);

        if !tokio::fs::try_exists(&task_dir).await.unwrap_or(false) {
            return Err(Error::not_found(format!("Task directory not found: {}", task_id)));
        }

        let custom_name = strip_docx_suffix(new_name.trim()).trim().to_string();
        if custom_name.is_empty() {
            return Err(Error::invalid("newFileName must not be empty"));
        }

        let mut meta = read_metadata(&task_dir).await.unwrap_or_default();
        let physical = match meta.physical_file() {
            Some(file) => file.to_string(),
            None => scan_docx_files(&task_dir)
                .await
                .into_iter()
                .next()
                .ok_or_else(|| Error::not_found("No source docx file in task directory"))?,
        };

        let unchanged = meta.custom_name.as_deref() == Some(custom_name.as_str())
            && meta.physical_file() == Some(physical.as_str())
            && meta.id.as_deref() == Some(task_id)
            && meta.agent_user_id.as_deref() == Some(user);

        if !unchanged {
            meta.id = Some(task_id.to_string());
            meta.agent_user_id = Some(user.to_string());
            meta.physical_file = Some(physical.clone());
            meta.custom_name = Some(custom_name.clone());
            meta.last_modified = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
            write_metadata(&task_dir, &meta).await?;
            tracing::info!(user, task_id, name = %custom_name, "Document renamed");
        }

        Ok(RenameOutcome {
            physical_file: physical,
            custom_name,
        })
    }

    /// Remove a document's save directory and its upload directory
    pub async fn delete(&self, user: &str, task_id: &str) -> Result<()> {
        let user = ensure_component("agentUserId", user)?;
        let task_id = ensure_component("taskId", task_id)?;
        let save_dir = self.layout.save_dir(user, task_id);

        if !tokio::fs::try_exists(&save_dir).await.unwrap_or(false) {
            return Err(Error::not_found(format!("Task directory not found: {}", task_id)));
        }
        tokio::fs::remove_dir_all(&save_dir).await?;
        remove_dir_if_exists(&self.layout.upload_dir(user, task_id)).await?;
        tracing::info!(user, task_id, "Document deleted");
        Ok(())
    }

    pub fn task_dir(&self, user: &str, task_id: &str) -> PathBuf {
        self.layout.save_dir(user, task_id)
    }
}

/// Remove a directory tree, treating "already gone" as success
pub async fn remove_dir_if_exists(dir: &Path) -> Result<bool> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn strip_docx_suffix(name: &str) -> &str {
    let len = name.len();
    if len >= 5 && name.is_char_boundary(len - 5) && name[len - 5..].eq_ignore_ascii_case(".docx") {
        &name[..len - 5]
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::metadata::METADATA_FILE;
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        registry: DocumentRegistry,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let registry = DocumentRegistry::new(StorageLayout::new(root.join("public"), root.join("data")));
        Fixture {
            _dir: dir,
            root,
            registry,
        }
    }

    impl Fixture {
        fn task(&self, task: &str) -> PathBuf {
            let dir = self.root.join("public/save/123").join(task);
            std::fs::create_dir_all(&dir).unwrap();
            dir
        }
    }

    #[tokio::test]
    async fn test_metadata_name_wins() {
        let f = fixture();
        let dir = f.task("1");
        std::fs::write(dir.join("scan_res.docx"), vec![0u8; 2048]).unwrap();
        std::fs::write(
            dir.join(METADATA_FILE),
            json!({"physicalFile": "scan_res.docx", "customName": "Contract"}).to_string(),
        )
        .unwrap();

        let docs = f.registry.list("123").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "Contract.docx");
        assert_eq!(docs[0].physical_name.as_deref(), Some("scan_res.docx"));
        assert_eq!(docs[0].size, "2.0 KB");

        std::fs::write(dir.join(METADATA_FILE), json!({"physicalFile": "scan_res.docx"}).to_string())
            .unwrap();
        let docs = f.registry.list("123").await.unwrap();
        assert_eq!(docs[0].name, "scan_res.docx");
        assert!(docs[0].custom_name.is_none());
    }

    #[tokio::test]
    async fn test_fallback_scan_and_exclusion() {
        let f = fixture();
        let dir = f.task("2");
        std::fs::write(dir.join("b.docx"), b"x").unwrap();
        std::fs::write(dir.join("a.docx"), b"x").unwrap();
        std::fs::write(dir.join("~$a.docx"), b"x").unwrap();
        std::fs::write(dir.join("a.origin.docx"), b"x").unwrap();

        let empty = f.task("3");
        std::fs::write(empty.join("notes.txt"), b"x").unwrap();
        std::fs::write(empty.join("~$lock.docx"), b"x").unwrap();

        let docs = f.registry.list("123").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "2");
        assert_eq!(docs[0].name, "a.docx");
        assert_eq!(docs[0].physical_name.as_deref(), Some("a.docx"));
        assert_eq!(docs[0].status, DocumentStatus::Pending);
        assert_eq!(docs[0].size, "1 B");
    }

    #[tokio::test]
    async fn test_status_from_parsed_marker() {
        let f = fixture();
        let dir = f.task("4");
        std::fs::write(dir.join("a.docx"), b"x").unwrap();
        std::fs::write(dir.join("a_tables_with_heading.json"), b"[]").unwrap();

        let docs = f.registry.list("123").await.unwrap();
        assert_eq!(docs[0].status, DocumentStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_user_lists_nothing() {
        let f = fixture();
        assert!(f.registry.list("999").await.unwrap().is_empty());
        assert!(f.registry.list("../x").await.is_err());
    }

    #[test]
    fn test_dual_sort_order() {
        let mut numeric = vec!["2", "10", "1"];
        sort_task_ids(&mut numeric, |s| s);
        assert_eq!(numeric, vec!["10", "2", "1"]);

        let mut mixed = vec!["2", "10", "1718000000000abc"];
        sort_task_ids(&mut mixed, |s| s);
        assert_eq!(mixed, vec!["2", "1718000000000abc", "10"]);
    }

    #[tokio::test]
    async fn test_rename_is_idempotent() {
        let f = fixture();
        let dir = f.task("5");
        std::fs::write(dir.join("report.docx"), b"x").unwrap();

        let outcome = f.registry.rename("123", "5", "  Annual Report.DOCX ").await.unwrap();
        assert_eq!(outcome.custom_name, "Annual Report");
        assert_eq!(outcome.physical_file, "report.docx");
        let first = std::fs::read_to_string(dir.join(METADATA_FILE)).unwrap();

        f.registry.rename("123", "5", "Annual Report.docx").await.unwrap();
        let second = std::fs::read_to_string(dir.join(METADATA_FILE)).unwrap();
        assert_eq!(first, second);

        // Physical file untouched
        assert!(dir.join("report.docx").exists());
        let docs = f.registry.list("123").await.unwrap();
        assert_eq!(docs[0].name, "Annual Report.docx");
    }

    #[tokio::test]
    async fn test_rename_failures() {
        let f = fixture();
        assert!(matches!(
            f.registry.rename("123", "404", "x").await,
            Err(Error::NotFound(_))
        ));

        f.task("6");
        match f.registry.rename("123", "6", "x").await {
            Err(Error::NotFound(msg)) => assert!(msg.contains("No source")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete() {
        let f = fixture();
        let dir = f.task("7");
        std::fs::write(dir.join("a.docx"), b"x").unwrap();
        f.registry.delete("123", "7").await.unwrap();
        assert!(!dir.exists());
        assert!(matches!(f.registry.delete("123", "7").await, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
        assert_eq!(format_kb(35.0), "35 KB");
        assert_eq!(strip_docx_suffix("a.Docx"), "a");
        assert_eq!(strip_docx_suffix("报告"), "报告");
    }
}
