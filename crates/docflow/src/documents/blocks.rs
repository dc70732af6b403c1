//! Block-content marker grammar of parsed documents
//!
//! The parsing pipeline embeds provenance markers in each block's `content`:
//!
//! ```text
//! {{#T#:file.xlsx}}      table stored under table/
//! {{#I#:file.png}}       image stored under img/
//! [#PDF-LOC:n#]          1-based source page
//! 📊 点击编辑关联表格 3    legacy table caption with a table number
//! 🖼️ 点击查看高清原图      legacy image caption
//! ```

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::storage::encode_segment;

/// Captions that open a table block
pub const TABLE_CAPTIONS: &[&str] = &["📊 点击编辑关联表格", "📊 点击编辑表格"];
/// Captions that mark an image block
pub const IMAGE_CAPTIONS: &[&str] = &["🖼️ 点击查看高清原图", "🖼️ 点击查看图片"];

fn table_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{#T#:(.*?)\}\}").expect("Invalid regex"))
}

fn image_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{#I#:(.*?)\}\}").expect("Invalid regex"))
}

fn page_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[#PDF-LOC:(\d+)#\]").expect("Invalid regex"))
}

fn legacy_table_number() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"点击编辑关联表格\s*(\d+)").expect("Invalid regex"))
}

fn section_number() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\d+\.?\s*").expect("Invalid regex"))
}

/// Where a table block's spreadsheet lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSource {
    File(String),
    /// Older output: only a caption number, file name derived from the page
    Legacy { number: Option<u32> },
}

/// Where an image block's picture lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    File(String),
    Legacy,
}

/// One parsed block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Text { content: String, page: Option<u32> },
    TableRef { source: TableSource, page: Option<u32> },
    ImageRef { source: ImageSource, page: Option<u32> },
}

/// Source page from `[#PDF-LOC:n#]`
pub fn page_of(content: &str) -> Option<u32> {
    page_token()
        .captures(content)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn token(re: &Regex, content: &str) -> Option<String> {
    re.captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn is_table_content(content: &str) -> bool {
    TABLE_CAPTIONS.iter().any(|c| content.starts_with(c)) || content.contains("{{#T#:")
}

pub fn is_image_content(content: &str) -> bool {
    IMAGE_CAPTIONS.iter().any(|c| content.contains(c)) || content.contains("{{#I#:")
}

/// Classify one block's content
pub fn parse_block(content: &str) -> Block {
    let page = page_of(content);

    if is_table_content(content) {
        let source = match token(table_token(), content) {
            Some(file) => TableSource::File(file),
            None => TableSource::Legacy {
                number: legacy_table_number()
                    .captures(content)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse().ok()),
            },
        };
        return Block::TableRef { source, page };
    }

    if is_image_content(content) {
        let source = match token(image_token(), content) {
            Some(file) => ImageSource::File(file),
            None => ImageSource::Legacy,
        };
        return Block::ImageRef { source, page };
    }

    Block::Text {
        content: content.to_string(),
        page,
    }
}

/// Element counts and page span of a block list
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct BlockStats {
    pub text: u32,
    pub tables: u32,
    pub images: u32,
    pub pages: u32,
}

/// `content` strings of a blocks document (`[...]` or `{blocks: [...]}`)
pub fn block_items(data: &Value) -> Option<&Vec<Value>> {
    data.as_array()
        .or_else(|| data.get("blocks").and_then(Value::as_array))
}

fn content_of(item: &Value) -> &str {
    item.get("content").and_then(Value::as_str).unwrap_or_default()
}

/// Count blocks by kind. Pages default to 1 for a non-empty document.
pub fn block_stats(items: &[Value]) -> BlockStats {
    let mut stats = BlockStats::default();
    for item in items {
        let content = content_of(item);
        if content.is_empty() {
            continue;
        }
        match parse_block(content) {
            Block::Text { .. } => stats.text += 1,
            Block::TableRef { .. } => stats.tables += 1,
            Block::ImageRef { .. } => stats.images += 1,
        }
        if let Some(page) = page_of(content) {
            stats.pages = stats.pages.max(page);
        }
    }
    if stats.pages == 0 && !items.is_empty() {
        stats.pages = 1;
    }
    stats
}

/// One displayable element of a parsed document
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetailItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub content: String,
    pub page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub metadata: Map<String, Value>,
}

/// Parsed document split into text, tables and images
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DocumentDetails {
    pub text: Vec<DetailItem>,
    pub tables: Vec<DetailItem>,
    pub images: Vec<DetailItem>,
}

const CARRIED_FIELDS: &[&str] = &[
    "heading_level",
    "heading_title",
    "heading_meta",
    "char_start",
    "char_end",
    "line_start",
    "line_end",
];

/// Turns block references into browser URLs for one task
#[derive(Debug, Clone)]
pub struct BlockResolver {
    user: String,
    task_id: String,
    physical_base: String,
}

impl BlockResolver {
    /// `physical_name` is the task's document file; legacy names derive from it
    pub fn new(user: &str, task_id: &str, physical_name: &str) -> Self {
        let physical_base = physical_name
            .replace("_res.docx", "")
            .replace(".docx", "");
        Self {
            user: user.to_string(),
            task_id: task_id.to_string(),
            physical_base,
        }
    }

    /// Path of a table relative to the task directory
    pub fn table_path(&self, source: &TableSource, page: Option<u32>, ordinal: usize) -> String {
        match source {
            TableSource::File(file) if file.contains('/') => file.clone(),
            TableSource::File(file) => format!("table/{}", file),
            TableSource::Legacy { number } => {
                let loc = page.map(|p| p.saturating_sub(1)).unwrap_or(0);
                let number = number.map(|n| n as usize).unwrap_or(ordinal);
                format!("table/{}_{}_table_{}.xlsx", self.physical_base, loc, number)
            }
        }
    }

    /// `/save/<user>/<task>/<path>`
    pub fn relative_key(&self, table_path: &str) -> String {
        format!("/save/{}/{}/{}", self.user, self.task_id, table_path)
    }

    /// Image-proxy URL of an image reference
    pub fn image_url(&self, source: &ImageSource, page: Option<u32>, ordinal: usize) -> String {
        let file = match source {
            ImageSource::File(file) => file.clone(),
            ImageSource::Legacy => format!(
                "{}_{}_layout_det_res_1.png",
                self.physical_base,
                page.map(|p| p as usize).unwrap_or(ordinal)
            ),
        };
        format!(
            "/api/image-proxy?path=/my-doc-system-uploads/save/{}/{}/img/{}",
            encode_segment(&self.user),
            encode_segment(&self.task_id),
            encode_segment(&file)
        )
    }

    /// Split raw blocks into displayable text, table and image items
    pub fn details(&self, items: &[Value]) -> DocumentDetails {
        let mut details = DocumentDetails::default();

        for item in items {
            let content = content_of(item);
            let heading = item
                .get("heading_title")
                .and_then(Value::as_str)
                .filter(|h| !h.is_empty());
            let block_id = item.get("block_id").and_then(Value::as_str);

            let mut metadata = Map::new();
            for field in CARRIED_FIELDS {
                if let Some(v) = item.get(*field) {
                    metadata.insert(field.to_string(), v.clone());
                }
            }

            match parse_block(content) {
                Block::Text { page, .. } => {
                    if content.is_empty() && heading.is_none() {
                        continue;
                    }
                    let index = details.text.len();
                    details.text.push(DetailItem {
                        id: block_id.map(str::to_string).unwrap_or_else(|| format!("text-{}", index)),
                        kind: "text",
                        content: if content.is_empty() {
                            heading.unwrap_or_default().to_string()
                        } else {
                            content.to_string()
                        },
                        page: page.unwrap_or(1),
                        image_url: None,
                        metadata,
                    });
                }
                Block::TableRef { source, page } => {
                    let index = details.tables.len();
                    let path = self.table_path(&source, page, index + 1);
                    let mut name = match (&source, heading) {
                        (TableSource::File(file), None) => file.clone(),
                        (_, Some(h)) => h.to_string(),
                        (_, None) => format!("Table {}", index + 1),
                    };
                    name = section_number().replace(&name, "").into_owned();

                    metadata.insert("original_name".into(), Value::from(heading.unwrap_or(&name)));
                    metadata.insert("relative_key".into(), Value::from(self.relative_key(&path)));
                    metadata.insert("table_path".into(), Value::from(path));
                    details.tables.push(DetailItem {
                        id: block_id.map(str::to_string).unwrap_or_else(|| format!("table-{}", index)),
                        kind: "table",
                        content: name,
                        page: page.unwrap_or(1),
                        image_url: None,
                        metadata,
                    });
                }
                Block::ImageRef { source, page } => {
                    let index = details.images.len();
                    let url = self.image_url(&source, page, index + 1);
                    let name = match (&source, heading) {
                        (_, Some(h)) => h.to_string(),
                        (ImageSource::File(file), None) => file.clone(),
                        (ImageSource::Legacy, None) => {
                            format!("Image {}", page.map(|p| p as usize).unwrap_or(index + 1))
                        }
                    };
                    if let Some(p) = page {
                        metadata.insert("pdf_loc".into(), Value::from(p));
                    }
                    details.images.push(DetailItem {
                        id: block_id.map(str::to_string).unwrap_or_else(|| format!("image-{}", index)),
                        kind: "image",
                        content: name,
                        page: page.unwrap_or(1),
                        image_url: Some(url),
                        metadata,
                    });
                }
            }
        }

        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tagged_tokens() {
        assert_eq!(
            parse_block("📊 点击编辑表格 {{#T#:t_1.xlsx}} [#PDF-LOC:3#]"),
            Block::TableRef {
                source: TableSource::File("t_1.xlsx".to_string()),
                page: Some(3)
            }
        );
        assert_eq!(
            parse_block("📊 点击编辑关联表格 2 [#PDF-LOC:5#]"),
            Block::TableRef {
                source: TableSource::Legacy { number: Some(2) },
                page: Some(5)
            }
        );
        assert_eq!(
            parse_block("前言 🖼️ 点击查看图片 {{#I#:p.png}}"),
            Block::ImageRef {
                source: ImageSource::File("p.png".to_string()),
                page: None
            }
        );
        assert!(matches!(parse_block("plain [#PDF-LOC:2#]"), Block::Text { page: Some(2), .. }));
    }

    #[test]
    fn test_block_stats() {
        let items = vec![
            json!({"content": "intro [#PDF-LOC:1#]"}),
            json!({"content": "📊 点击编辑表格 {{#T#:a.xlsx}} [#PDF-LOC:4#]"}),
            json!({"content": "🖼️ 点击查看高清原图 [#PDF-LOC:2#]"}),
            json!({"content": ""}),
            json!({"heading_title": "only heading"}),
        ];
        assert_eq!(
            block_stats(&items),
            BlockStats {
                text: 1,
                tables: 1,
                images: 1,
                pages: 4
            }
        );
        assert_eq!(block_stats(&[json!({"content": "x"})]).pages, 1);
        assert_eq!(block_stats(&[]).pages, 0);
    }

    #[test]
    fn test_resolution() {
        let r = BlockResolver::new("123", "7", "XA_certificate_res.docx");

        assert_eq!(r.table_path(&TableSource::File("a.xlsx".into()), None, 1), "table/a.xlsx");
        assert_eq!(r.table_path(&TableSource::File("sub/a.xlsx".into()), None, 1), "sub/a.xlsx");
        assert_eq!(
            r.table_path(&TableSource::Legacy { number: Some(2) }, Some(5), 1),
            "table/XA_certificate_4_table_2.xlsx"
        );
        assert_eq!(r.relative_key("table/a.xlsx"), "/save/123/7/table/a.xlsx");
        assert_eq!(
            r.image_url(&ImageSource::File("p 1.png".into()), None, 1),
            "/api/image-proxy?path=/my-doc-system-uploads/save/123/7/img/p%201.png"
        );
        assert_eq!(
            r.image_url(&ImageSource::Legacy, Some(3), 1),
            "/api/image-proxy?path=/my-doc-system-uploads/save/123/7/img/XA_certificate_3_layout_det_res_1.png"
        );
    }

    #[test]
    fn test_details_split() {
        let r = BlockResolver::new("123", "7", "doc.docx");
        let items = vec![
            json!({"block_id": "b1", "content": "hello", "heading_level": 2}),
            json!({"content": "📊 点击编辑表格 {{#T#:t.xlsx}}", "heading_title": "1.2 Budget"}),
            json!({"content": "🖼️ 点击查看图片 {{#I#:i.png}}"}),
        ];
        let details = r.details(&items);

        assert_eq!(details.text.len(), 1);
        assert_eq!(details.text[0].id, "b1");
        assert_eq!(details.text[0].metadata["heading_level"], 2);

        assert_eq!(details.tables[0].content, "Budget");
        assert_eq!(details.tables[0].metadata["table_path"], "table/t.xlsx");
        assert_eq!(details.tables[0].metadata["original_name"], "1.2 Budget");

        assert_eq!(details.images[0].content, "i.png");
        assert!(details.images[0].image_url.as_ref().unwrap().ends_with("/img/i.png"));
    }
}
