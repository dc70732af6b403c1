//! `metadata.json` sidecar of a task directory

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::error::Result;

/// Sidecar file name inside `save/<user>/<task>/`
pub const METADATA_FILE: &str = "metadata.json";

/// Parsed element counts of a document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementCounts {
    pub text: u32,
    pub tables: u32,
    pub images: u32,
}

/// Sidecar contents. Unknown keys written by other tools survive a rewrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(
        rename = "agentUserId",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub agent_user_id: Option<String>,
    #[serde(rename = "physicalFile", default, skip_serializing_if = "Option::is_none")]
    pub physical_file: Option<String>,
    #[serde(rename = "customName", default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    #[serde(rename = "lastModified", default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub file_size_kb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_counts: Option<ElementCounts>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DocumentMetadata {
    /// Non-blank custom name, if any
    pub fn display_name(&self) -> Option<&str> {
        self.custom_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }

    pub fn physical_file(&self) -> Option<&str> {
        self.physical_file.as_deref().filter(|f| !f.is_empty())
    }
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Read the sidecar of a task directory. Missing or unreadable sidecars are `None`.
pub async fn read_metadata(task_dir: &Path) -> Option<DocumentMetadata> {
    let path = task_dir.join(METADATA_FILE);
    let bytes = tokio::fs::read(&path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(meta) => Some(meta),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable metadata");
            None
        }
    }
}

/// Write the sidecar as pretty JSON
pub async fn write_metadata(task_dir: &Path, metadata: &DocumentMetadata) -> Result<()> {
    let json = serde_json::to_string_pretty(metadata)?;
    tokio::fs::write(task_dir.join(METADATA_FILE), json).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_fields_and_extra_keys() {
        let meta: DocumentMetadata = serde_json::from_str(
            r#"{"id": 12, "agentUserId": "123", "physicalFile": "a.docx",
                "file_size_kb": "35.5", "pages": 3, "source": "ocr"}"#,
        )
        .unwrap();

        assert_eq!(meta.id.as_deref(), Some("12"));
        assert_eq!(meta.file_size_kb, Some(35.5));
        assert_eq!(meta.extra["source"], "ocr");
        assert!(meta.display_name().is_none());

        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["source"], "ocr");
        assert_eq!(back["physicalFile"], "a.docx");
        assert!(back.get("customName").is_none());
    }

    #[tokio::test]
    async fn test_read_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_metadata(dir.path()).await.is_none());

        let meta = DocumentMetadata {
            custom_name: Some("  Quarterly  ".to_string()),
            element_counts: Some(ElementCounts { text: 4, tables: 1, images: 0 }),
            ..Default::default()
        };
        write_metadata(dir.path(), &meta).await.unwrap();

        let read = read_metadata(dir.path()).await.unwrap();
        assert_eq!(read, meta);
        assert_eq!(read.display_name(), Some("Quarterly"));

        std::fs::write(dir.path().join(METADATA_FILE), b"{broken").unwrap();
        assert!(read_metadata(dir.path()).await.is_none());
    }
}
