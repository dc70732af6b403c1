//! Schema artifacts under the data root
//!
//! `generater_json` holds what the schema service produced, `extractenti_json`
//! what the user edited, `output` the extraction results. A saved schema
//! always wins over a generated one.

use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::storage::{ensure_component, StorageLayout, GENERATED_SCHEMA_DIR, OUTPUT_DIR, SAVED_SCHEMA_DIR};

/// Which artifact a caller asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Generated,
    Saved,
    Result,
}

impl SchemaKind {
    /// `None` selects saved-over-generated
    pub fn parse(value: Option<&str>) -> Result<Option<Self>> {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            None => Ok(None),
            Some("generated") => Ok(Some(Self::Generated)),
            Some("saved") => Ok(Some(Self::Saved)),
            Some("result") => Ok(Some(Self::Result)),
            Some(other) => Err(Error::invalid(format!("Unknown schema type: {}", other))),
        }
    }
}

/// Outcome of saving an edited schema
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSchema {
    pub task_id: String,
    pub full_path: String,
    pub exists: bool,
    pub file_size: u64,
    pub user_id: String,
}

#[derive(Debug, Clone)]
pub struct SchemaStore {
    layout: StorageLayout,
}

impl SchemaStore {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    pub fn generated_path(&self, user: &str, task_id: &str) -> PathBuf {
        self.layout.artifact_path(GENERATED_SCHEMA_DIR, user, task_id)
    }

    pub fn saved_path(&self, user: &str, task_id: &str) -> PathBuf {
        self.layout.artifact_path(SAVED_SCHEMA_DIR, user, task_id)
    }

    /// Result candidates in lookup order
    pub fn result_candidates(&self, user: &str, task_id: &str) -> Vec<PathBuf> {
        let output = self.layout.data_root().join(OUTPUT_DIR);
        vec![
            self.layout.artifact_path(OUTPUT_DIR, user, task_id),
            output.join(format!("{}.json", task_id)),
            output.join(format!("final_result{}.json", task_id)),
        ]
    }

    /// File that would answer a request of `kind`; `None` when nothing exists
    pub async fn resolve(&self, kind: Option<SchemaKind>, user: &str, task_id: &str) -> Result<Option<PathBuf>> {
        let user = ensure_component("agentUserId", user)?;
        let task_id = ensure_component("taskId", task_id)?;

        let candidates = match kind {
            Some(SchemaKind::Generated) => vec![self.generated_path(user, task_id)],
            Some(SchemaKind::Saved) => vec![self.saved_path(user, task_id)],
            Some(SchemaKind::Result) => self.result_candidates(user, task_id),
            None => vec![self.saved_path(user, task_id), self.generated_path(user, task_id)],
        };

        for path in candidates {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    pub async fn load(&self, kind: Option<SchemaKind>, user: &str, task_id: &str) -> Result<Value> {
        let path = self
            .resolve(kind, user, task_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("No schema artifact for task {}", task_id)))?;
        let bytes = tokio::fs::read(&path).await?;
        tracing::debug!(path = %path.display(), "Loaded schema artifact");
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Persist a user-edited schema as the saved artifact
    pub async fn save(&self, user: &str, task_id: &str, schema: Option<&Value>) -> Result<SavedSchema> {
        let user = ensure_component("agentUserId", user)?;
        let task_id = ensure_component("taskId", task_id)?;
        let path = self.saved_path(user, task_id);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Some(schema) = schema {
            tokio::fs::write(&path, serde_json::to_string_pretty(schema)?).await?;
            tracing::info!(user, task_id, path = %path.display(), "Saved edited schema");
        }

        let file_size = tokio::fs::metadata(&path).await.map(|m| m.len()).ok();
        Ok(SavedSchema {
            task_id: task_id.to_string(),
            full_path: path.display().to_string(),
            exists: file_size.is_some(),
            file_size: file_size.unwrap_or(0),
            user_id: user.to_string(),
        })
    }
}
