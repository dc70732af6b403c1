//! Export of a document's displayed content to a downloadable file

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::storage::{encode_segment, ensure_component};

/// Directory under the public root holding exports
pub const EXPORT_DIR: &str = "exports";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// HTML body with a `.docx` name, opened by Word
    Word,
    /// CSV body with an `.xlsx` name, opened by Excel
    Excel,
    Json,
    Markdown,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "word" => Ok(Self::Word),
            "excel" => Ok(Self::Excel),
            "json" => Ok(Self::Json),
            "markdown" => Ok(Self::Markdown),
            other => Err(Error::invalid(format!("Unsupported export format: {}", other))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Word => "docx",
            Self::Excel => "xlsx",
            Self::Json => "json",
            Self::Markdown => "markdown",
        }
    }
}

/// One displayed element as the browser holds it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportItem {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl ExportItem {
    fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportContent {
    #[serde(default)]
    pub text: Vec<ExportItem>,
    #[serde(default)]
    pub tables: Vec<ExportItem>,
    #[serde(default)]
    pub images: Vec<ExportItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub agent_user_id: String,
    pub task_id: String,
    pub file_name: String,
    pub format: String,
    pub content_types: Value,
    pub content: ExportContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOutcome {
    pub file_name: String,
    pub download_url: String,
    pub format: ExportFormat,
    pub content_types: Value,
}

fn base_name(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 && !file_name[idx..].contains('/') => &file_name[..idx],
        _ => file_name,
    }
}

fn export_time() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn render_json(request: &ExportRequest) -> Result<String> {
    let doc = json!({
        "document": {
            "name": request.file_name,
            "taskId": request.task_id,
            "exportDate": Utc::now().to_rfc3339(),
            "contentTypes": request.content_types,
        },
        "content": request.content,
    });
    Ok(serde_json::to_string_pretty(&doc)?)
}

pub fn render_markdown(content: &ExportContent, file_name: &str) -> String {
    let mut out = format!("# {}\n\n导出时间: {}\n\n", file_name, export_time());

    if !content.text.is_empty() {
        out.push_str("## 文本内容\n\n");
        for item in &content.text {
            if let Some(heading) = item.meta_str("heading_title") {
                out.push_str(&format!("### {}\n\n", heading));
            }
            out.push_str(&format!("{}\n\n", item.text()));
        }
    }

    if !content.tables.is_empty() {
        out.push_str("## 表格内容\n\n");
        for (i, item) in content.tables.iter().enumerate() {
            out.push_str(&format!("### 表格 {}: {}\n\n", i + 1, item.text()));
            if let Some(path) = item.meta_str("table_path") {
                out.push_str(&format!("表格文件路径: {}\n\n", path));
            }
        }
    }

    if !content.images.is_empty() {
        out.push_str("## 图片内容\n\n");
        for (i, item) in content.images.iter().enumerate() {
            out.push_str(&format!("### 图片 {}: {}\n\n", i + 1, item.text()));
            if let Some(url) = &item.image_url {
                let alt = match item.text() {
                    "" => format!("图片 {}", i + 1),
                    t => t.to_string(),
                };
                out.push_str(&format!("![{}]({})\n\n", alt, url));
            }
        }
    }

    out
}

pub fn render_html(content: &ExportContent, file_name: &str) -> String {
    let title = escape_html(file_name);
    let mut out = format!(
        "<html><head><title>{}</title><meta charset=\"utf-8\"></head><body><h1>{}</h1><p>导出时间: {}</p>",
        title,
        title,
        export_time()
    );

    if !content.text.is_empty() {
        out.push_str("<h2>文本内容</h2>");
        for item in &content.text {
            if let Some(heading) = item.meta_str("heading_title") {
                out.push_str(&format!("<h3>{}</h3>", escape_html(heading)));
            }
            out.push_str(&format!("<p>{}</p>", escape_html(item.text())));
        }
    }

    if !content.tables.is_empty() {
        out.push_str("<h2>表格内容</h2>");
        for (i, item) in content.tables.iter().enumerate() {
            out.push_str(&format!("<h3>表格 {}: {}</h3>", i + 1, escape_html(item.text())));
            if let Some(path) = item.meta_str("table_path") {
                out.push_str(&format!("<p>表格文件路径: {}</p>", escape_html(path)));
            }
        }
    }

    if !content.images.is_empty() {
        out.push_str("<h2>图片内容</h2>");
        for (i, item) in content.images.iter().enumerate() {
            out.push_str(&format!("<h3>图片 {}: {}</h3>", i + 1, escape_html(item.text())));
            if let Some(url) = &item.image_url {
                let alt = match item.text() {
                    "" => format!("图片 {}", i + 1),
                    t => t.to_string(),
                };
                out.push_str(&format!(
                    "<img src=\"{}\" alt=\"{}\" />",
                    escape_html(url),
                    escape_html(&alt)
                ));
            }
        }
    }

    out.push_str("</body></html>");
    out
}

pub fn render_csv(content: &ExportContent, file_name: &str) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());
    let csv_err = |e: csv::Error| Error::internal(format!("CSV export failed: {}", e));

    writer.write_record([file_name]).map_err(csv_err)?;
    writer.write_record(["导出时间", &export_time()]).map_err(csv_err)?;

    if !content.text.is_empty() {
        writer.write_record(["文本内容"]).map_err(csv_err)?;
        writer.write_record(["标题", "内容"]).map_err(csv_err)?;
        for item in &content.text {
            let heading = item.meta_str("heading_title").unwrap_or_default();
            writer.write_record([heading, item.text()]).map_err(csv_err)?;
        }
    }

    if !content.tables.is_empty() {
        writer.write_record(["表格内容"]).map_err(csv_err)?;
        writer.write_record(["表格名称", "文件路径"]).map_err(csv_err)?;
        for item in &content.tables {
            let path = item.meta_str("table_path").unwrap_or_default();
            writer.write_record([item.text(), path]).map_err(csv_err)?;
        }
    }

    if !content.images.is_empty() {
        writer.write_record(["图片内容"]).map_err(csv_err)?;
        writer.write_record(["图片名称", "图片URL"]).map_err(csv_err)?;
        for item in &content.images {
            let url = item.image_url.as_deref().unwrap_or_default();
            writer.write_record([item.text(), url]).map_err(csv_err)?;
        }
    }

    writer
        .into_inner()
        .map_err(|e| Error::internal(format!("CSV export failed: {}", e)))
}

/// Writes exports under `<public>/exports/<user>/<task>/`
#[derive(Debug, Clone)]
pub struct Exporter {
    export_root: PathBuf,
}

impl Exporter {
    pub fn new(public_root: &Path) -> Self {
        Self {
            export_root: public_root.join(EXPORT_DIR),
        }
    }

    pub async fn export(&self, request: &ExportRequest) -> Result<ExportOutcome> {
        let user = ensure_component("agentUserId", &request.agent_user_id)?;
        let task_id = ensure_component("taskId", &request.task_id)?;
        if request.file_name.trim().is_empty() {
            return Err(Error::invalid("fileName is required"));
        }
        let format = ExportFormat::parse(&request.format)?;

        let dir = self.export_root.join(user).join(task_id);
        tokio::fs::create_dir_all(&dir).await?;

        let base = base_name(request.file_name.trim());
        let base = Path::new(base)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let file_name = format!(
            "{}_export_{}.{}",
            base,
            Utc::now().timestamp_millis(),
            format.extension()
        );

        let body = match format {
            ExportFormat::Json => render_json(request)?.into_bytes(),
            ExportFormat::Markdown => render_markdown(&request.content, &request.file_name).into_bytes(),
            ExportFormat::Word => render_html(&request.content, &request.file_name).into_bytes(),
            ExportFormat::Excel => render_csv(&request.content, &request.file_name)?,
        };
        tokio::fs::write(dir.join(&file_name), body).await?;

        tracing::info!(user, task_id, file = %file_name, "Document exported");

        Ok(ExportOutcome {
            download_url: format!(
                "/api/file-proxy?path=/my-doc-system-uploads/{}/{}/{}/{}",
                EXPORT_DIR,
                encode_segment(user),
                encode_segment(task_id),
                encode_segment(&file_name)
            ),
            file_name,
            format,
            content_types: request.content_types.clone(),
        })
    }
}
