//! Per-service status classifiers

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use super::poller::{Classify, Observation};
use crate::dispatch::StatusProbe;

/// Extensions the OCR service may write its report with, in lookup order
pub const OCR_OUTPUT_EXTENSIONS: &[&str] = &["docx", "doc", "pdf"];

/// OCR report status codes
pub const OCR_COMPLETED: i64 = 0;
pub const OCR_FAILED: i64 = 1;
pub const OCR_PROCESSING: i64 = 2;

fn status_code(body: &Value) -> Option<i64> {
    body.get("report_generation_status").and_then(Value::as_i64)
}

fn genuine_progress(body: &Value, field: &str) -> Option<u8> {
    body.get(field)
        .and_then(Value::as_f64)
        .map(|p| p.clamp(0.0, 100.0) as u8)
}

fn text_field(body: &Value, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .find_map(|f| body.get(*f).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn is_non_empty_object(value: &Value) -> bool {
    value.as_object().map(|o| !o.is_empty()).unwrap_or(false)
}

/// Find the OCR output `<save_dir>/<base>.{docx,doc,pdf}` and its size
pub async fn find_ocr_output(save_dir: &Path, base_name: &str) -> Option<(PathBuf, u64)> {
    for ext in OCR_OUTPUT_EXTENSIONS {
        let candidate = save_dir.join(format!("{}.{}", base_name, ext));
        if let Ok(meta) = tokio::fs::metadata(&candidate).await {
            if meta.is_file() {
                return Some((candidate, meta.len()));
            }
        }
    }
    None
}

/// OCR report status: `0` plus a stat-able output file completes
#[derive(Debug, Clone)]
pub struct OcrClassifier {
    pub save_dir: PathBuf,
    pub base_name: String,
}

#[async_trait]
impl Classify for OcrClassifier {
    async fn classify(&self, probe: &StatusProbe) -> Observation {
        if probe.is_not_found() {
            return Observation::NotReady;
        }
        match status_code(&probe.body) {
            Some(OCR_COMPLETED) => match find_ocr_output(&self.save_dir, &self.base_name).await {
                Some((path, size)) => Observation::Completed(json!({
                    "filePath": path.to_string_lossy(),
                    "fileSize": size,
                    "status": probe.body,
                })),
                None => Observation::Pending {
                    progress: None,
                    message: Some("Report generated, waiting for the output file".to_string()),
                },
            },
            Some(OCR_FAILED) => Observation::Failed(
                text_field(&probe.body, &["report_generation_condition", "error"])
                    .unwrap_or_else(|| "OCR failed".to_string()),
            ),
            _ => Observation::Pending {
                progress: genuine_progress(&probe.body, "progress"),
                message: text_field(&probe.body, &["report_generation_condition"]),
            },
        }
    }
}

/// A JSON artifact that counts as done once it is a non-empty object
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactClassifier;

#[async_trait]
impl Classify for ArtifactClassifier {
    async fn classify(&self, probe: &StatusProbe) -> Observation {
        if probe.is_not_found() {
            return Observation::NotReady;
        }
        if is_non_empty_object(&probe.body) {
            Observation::Completed(probe.body.clone())
        } else {
            Observation::Pending {
                progress: None,
                message: Some("Result file is not complete yet".to_string()),
            }
        }
    }
}

/// Generic `{status, report_generation_status, file_path}` status endpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceStatusClassifier;

#[async_trait]
impl Classify for ServiceStatusClassifier {
    async fn classify(&self, probe: &StatusProbe) -> Observation {
        if probe.is_not_found() {
            return Observation::NotReady;
        }
        let body = &probe.body;
        if !probe.is_success() {
            return Observation::Pending {
                progress: None,
                message: Some(format!("Status endpoint answered {}", probe.status)),
            };
        }

        let status = body.get("status").and_then(Value::as_str).unwrap_or_default();
        let code = status_code(body);
        let has_file = body
            .get("file_path")
            .map(|v| !v.is_null() && v.as_str() != Some(""))
            .unwrap_or(false);

        if status == "completed" || (code == Some(0) && has_file) {
            return Observation::Completed(body.clone());
        }
        if status == "failed" || code == Some(OCR_FAILED) {
            return Observation::Failed(
                text_field(body, &["error", "report_generation_condition", "message"])
                    .unwrap_or_else(|| "Extraction failed".to_string()),
            );
        }
        Observation::Pending {
            progress: genuine_progress(body, "progress"),
            message: text_field(body, &["message"]),
        }
    }
}

/// Parsing pipeline `{status, percent, message}`
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineClassifier;

#[async_trait]
impl Classify for PipelineClassifier {
    async fn classify(&self, probe: &StatusProbe) -> Observation {
        if probe.is_not_found() {
            return Observation::NotReady;
        }
        let body = &probe.body;
        match body.get("status").and_then(Value::as_str).unwrap_or_default() {
            "success" => Observation::Completed(body.clone()),
            "failed" | "error" => Observation::Failed(
                text_field(body, &["message", "error"])
                    .unwrap_or_else(|| "Pipeline failed".to_string()),
            ),
            _ => Observation::Pending {
                progress: genuine_progress(body, "percent"),
                message: text_field(body, &["message"]),
            },
        }
    }
}
