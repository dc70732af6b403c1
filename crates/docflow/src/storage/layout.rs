//! Filesystem layout shared with the OCR, extraction and editor services

use reqwest::Url;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Directory under the public root holding raw uploads
pub const UPLOAD_DIR: &str = "upload";
/// Directory under the public root holding per-task results
pub const SAVE_DIR: &str = "save";

/// Machine-generated schemas under the data root
pub const GENERATED_SCHEMA_DIR: &str = "generater_json";
/// User-edited schemas under the data root
pub const SAVED_SCHEMA_DIR: &str = "extractenti_json";
/// Extraction results under the data root
pub const OUTPUT_DIR: &str = "output";

/// Resolves every well-known path of the shared layout:
///
/// ```text
/// <public>/upload/<user>/<task>/<file>
/// <public>/save/<user>/<task>/<physical file | metadata.json>
/// <public>/save/<user>/<task>/{img,table}/*
/// <data>/{generater_json,extractenti_json,output}/<user>/<task>.json
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    public_root: PathBuf,
    data_root: PathBuf,
}

impl StorageLayout {
    pub fn new(public_root: impl Into<PathBuf>, data_root: impl Into<PathBuf>) -> Self {
        Self {
            public_root: public_root.into(),
            data_root: data_root.into(),
        }
    }

    pub fn public_root(&self) -> &Path {
        &self.public_root
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn upload_root(&self) -> PathBuf {
        self.public_root.join(UPLOAD_DIR)
    }

    pub fn save_root(&self) -> PathBuf {
        self.public_root.join(SAVE_DIR)
    }

    pub fn user_upload_dir(&self, user: &str) -> PathBuf {
        self.upload_root().join(user)
    }

    pub fn upload_dir(&self, user: &str, task: &str) -> PathBuf {
        self.user_upload_dir(user).join(task)
    }

    pub fn user_save_dir(&self, user: &str) -> PathBuf {
        self.save_root().join(user)
    }

    pub fn save_dir(&self, user: &str, task: &str) -> PathBuf {
        self.user_save_dir(user).join(task)
    }

    /// `<data>/<artifact_dir>/<user>/<task>.json`
    pub fn artifact_path(&self, artifact_dir: &str, user: &str, task: &str) -> PathBuf {
        self.data_root
            .join(artifact_dir)
            .join(user)
            .join(format!("{}.json", task))
    }

    /// Browser-visible URL path of an uploaded file, e.g. `/upload/123/4/a%20b.docx`
    pub fn upload_url(&self, user: &str, task: &str, file: &str) -> String {
        public_url(&[UPLOAD_DIR, user, task, file])
    }

    /// Browser-visible URL path under `/save/...`
    pub fn save_url(&self, parts: &[&str]) -> String {
        let mut all = Vec::with_capacity(parts.len() + 1);
        all.push(SAVE_DIR);
        all.extend_from_slice(parts);
        public_url(&all)
    }
}

/// First regular file of `dir` in name order
pub async fn first_file(dir: &Path) -> Option<String> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    names.into_iter().next()
}

fn public_url(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts.iter().filter(|p| !p.is_empty()) {
        out.push('/');
        out.push_str(&encode_segment(part));
    }
    out
}

/// Percent-encode one URL path segment
pub fn encode_segment(segment: &str) -> String {
    let mut url = match Url::parse("http://localhost/") {
        Ok(u) => u,
        Err(_) => return segment.to_string(),
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.push(segment);
    }
    url.path().trim_start_matches('/').to_string()
}

/// Form-encode query parameters, e.g. `a=1&name=x+y`
pub fn encode_query(pairs: &[(&str, &str)]) -> String {
    match Url::parse_with_params("http://localhost/", pairs) {
        Ok(url) => url.query().unwrap_or_default().to_string(),
        Err(_) => String::new(),
    }
}

/// Reject ids that would escape their directory (`..`, separators, empty)
pub fn ensure_component<'a>(name: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains('/')
        || value.contains('\\')
        || value.contains('\0')
    {
        return Err(Error::invalid(format!("Invalid {}: '{}'", name, value)));
    }
    Ok(value)
}
