//! Rewrite `file://` hyperlinks inside uploaded `.docx` packages
//!
//! Links pointing at local files cannot be followed from the browser-based
//! editor, so their relationship targets are redirected through `/open`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};
use crate::storage::encode_query;

/// Relationship parts that may carry hyperlinks
const RELATIONSHIP_PARTS: &[&str] = &[
    "word/_rels/document.xml.rels",
    "word/_rels/footer1.xml.rels",
    "word/_rels/footer2.xml.rels",
    "word/_rels/header1.xml.rels",
    "word/_rels/header2.xml.rels",
];

fn zip_err(e: zip::result::ZipError) -> Error {
    Error::Internal(format!("Invalid docx package: {}", e))
}

fn xml_err(e: impl std::fmt::Display) -> Error {
    Error::Internal(format!("Invalid relationship XML: {}", e))
}

/// `/open?target=<encoded>` for one local link target
fn open_link(target: &str) -> String {
    format!("/open?{}", encode_query(&[("target", target)]))
}

/// Rewrite `Target="file://..."` attributes of `<Relationship>` elements.
///
/// Returns the new XML and the number of rewritten targets.
fn rewrite_relationships(xml: &str) -> Result<(String, usize)> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut rewritten = 0usize;

    loop {
        let event = reader.read_event().map_err(xml_err)?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e) if e.name().as_ref() == b"Relationship" => {
                let (elem, changed) = rewrite_element(e)?;
                if changed {
                    rewritten += 1;
                }
                let out = match event {
                    Event::Start(_) => Event::Start(elem),
                    _ => Event::Empty(elem),
                };
                writer.write_event(out).map_err(xml_err)?;
            }
            other => writer.write_event(other).map_err(xml_err)?,
        }
    }

    let bytes = writer.into_inner().into_inner();
    let xml = String::from_utf8(bytes).map_err(xml_err)?;
    Ok((xml, rewritten))
}

fn rewrite_element(e: &BytesStart<'_>) -> Result<(BytesStart<'static>, bool)> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut elem = BytesStart::new(name);
    let mut changed = false;

    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();

        if key == "Target" && value.starts_with("file://") {
            elem.push_attribute((key.as_str(), open_link(&value).as_str()));
            changed = true;
        } else {
            elem.push_attribute((key.as_str(), value.as_str()));
        }
    }

    Ok((elem, changed))
}

/// Rewrite local-file hyperlinks of a `.docx` package.
///
/// Returns `None` when nothing needed rewriting, otherwise the new package.
/// Untouched entries are copied without recompression.
pub fn rewrite_docx_hyperlinks(data: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut archive = ZipArchive::new(Cursor::new(data)).map_err(zip_err)?;

    let mut replacements = Vec::new();
    for part in RELATIONSHIP_PARTS {
        let mut file = match archive.by_name(part) {
            Ok(f) => f,
            Err(zip::result::ZipError::FileNotFound) => continue,
            Err(e) => return Err(zip_err(e)),
        };
        let mut xml = String::new();
        file.read_to_string(&mut xml)?;
        drop(file);

        let (new_xml, count) = rewrite_relationships(&xml)?;
        if count > 0 {
            tracing::debug!(part, count, "Rewrote local hyperlinks");
            replacements.push((part.to_string(), new_xml));
        }
    }

    if replacements.is_empty() {
        return Ok(None);
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i).map_err(zip_err)?;
        let name = entry.name().to_string();
        match replacements.iter().find(|(part, _)| *part == name) {
            Some((_, xml)) => {
                drop(entry);
                writer.start_file(name, options).map_err(zip_err)?;
                writer.write_all(xml.as_bytes())?;
            }
            None => writer.raw_copy_file(entry).map_err(zip_err)?,
        }
    }

    let cursor = writer.finish().map_err(zip_err)?;
    Ok(Some(cursor.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="file:///C:/docs/a%20b.pdf" TargetMode="External"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

    fn build_docx(rels: &str) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("[Content_Types].xml", options).unwrap();
        writer.write_all(b"<Types/>").unwrap();
        writer.start_file("word/_rels/document.xml.rels", options).unwrap();
        writer.write_all(rels.as_bytes()).unwrap();
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(b"<w:document/>").unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn read_entry(data: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let mut out = String::new();
        archive.by_name(name).unwrap().read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_rewrites_file_targets_only() {
        let (xml, count) = rewrite_relationships(RELS).unwrap();
        assert_eq!(count, 1);
        assert!(xml.contains("Target=\"/open?target=file%3A%2F%2F%2FC%3A%2Fdocs%2Fa%2520b.pdf\""));
        assert!(xml.contains("Target=\"styles.xml\""));
        assert!(xml.contains("TargetMode=\"External\""));
    }

    #[test]
    fn test_package_round_trip() {
        let docx = build_docx(RELS);
        let rewritten = rewrite_docx_hyperlinks(&docx).unwrap().unwrap();

        let rels = read_entry(&rewritten, "word/_rels/document.xml.rels");
        assert!(rels.contains("/open?target="));
        assert!(!rels.contains("Target=\"file://"));
        assert_eq!(read_entry(&rewritten, "word/document.xml"), "<w:document/>");
    }

    #[test]
    fn test_untouched_package_returns_none() {
        let docx = build_docx(r#"<Relationships><Relationship Id="r" Target="styles.xml"/></Relationships>"#);
        assert!(rewrite_docx_hyperlinks(&docx).unwrap().is_none());
    }

    #[test]
    fn test_not_a_zip() {
        assert!(rewrite_docx_hyperlinks(b"plain text").is_err());
    }
}
