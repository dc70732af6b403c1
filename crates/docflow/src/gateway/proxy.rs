//! Allow-listed path resolution for the file, image and content proxies

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::paths::PathTranslator;
use crate::storage::StorageLayout;

/// Prefixes accepted by the download proxy
pub const FILE_PROXY_PREFIXES: &[&str] = &["/my-doc-system-uploads/", "/save/", "/public/save/"];

/// Prefixes readable through the content endpoint
pub const FILE_CONTENT_PREFIXES: &[&str] = &["/tmp/output/", "/home/cqj/my-doc-system/"];

/// Browser-facing alias of the shared uploads mount
const UPLOADS_ALIAS: &str = "/my-doc-system-uploads";

/// Split a slash path into clean components, refusing `..`
fn clean_components(path: &str) -> Result<Vec<&str>> {
    let mut out = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => return Err(Error::Forbidden(format!("Path traversal in '{}'", path))),
            p if p.contains('\0') => {
                return Err(Error::Forbidden(format!("Invalid path '{}'", path)))
            }
            p => out.push(p),
        }
    }
    Ok(out)
}

/// Remainder after `prefix` when it ends on a component boundary
fn strip_dir_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}

fn join_clean(root: &Path, relative: &str) -> Result<PathBuf> {
    let mut path = root.to_path_buf();
    for part in clean_components(relative)? {
        path.push(part);
    }
    Ok(path)
}

/// Resolve a download-proxy path onto the public root.
///
/// `/my-doc-system-uploads/save/1/2/a.docx`, `/save/1/2/a.docx` and
/// `/public/save/1/2/a.docx` all land on `<public>/save/1/2/a.docx`.
pub fn resolve_file_proxy_path(requested: &str, layout: &StorageLayout) -> Result<PathBuf> {
    if !FILE_PROXY_PREFIXES.iter().any(|p| requested.starts_with(p)) {
        return Err(Error::Forbidden(format!("Path not allowed: {}", requested)));
    }

    let relative = requested
        .strip_prefix(UPLOADS_ALIAS)
        .or_else(|| requested.strip_prefix("/public"))
        .unwrap_or(requested);

    join_clean(layout.public_root(), relative)
}

/// Resolve an image-proxy path onto the container save root.
///
/// Accepts the browser alias, host save paths, container save paths and
/// paths relative to the save root. The result never leaves the save root.
pub fn resolve_image_proxy_path(
    requested: &str,
    layout: &StorageLayout,
    translator: &PathTranslator,
) -> Result<PathBuf> {
    let save_root = layout.save_root();
    let save_root_str = save_root.to_string_lossy().into_owned();
    let alias = format!("{}/save", UPLOADS_ALIAS);

    let relative = if let Some(rest) = strip_dir_prefix(requested, &alias) {
        rest.to_string()
    } else if let Some(rest) = strip_dir_prefix(requested, &save_root_str) {
        rest.to_string()
    } else if let Ok(container) = translator.to_container(requested) {
        match strip_dir_prefix(&container, &save_root_str) {
            Some(rest) => rest.to_string(),
            _ if requested.starts_with('/') => {
                return Err(Error::Forbidden(format!("Image path outside save root: {}", requested)))
            }
            _ => requested.to_string(),
        }
    } else if requested.starts_with('/') {
        return Err(Error::Forbidden(format!("Image path outside save root: {}", requested)));
    } else {
        requested.to_string()
    };

    let resolved = join_clean(&save_root, &relative)?;
    if !resolved.starts_with(&save_root) {
        return Err(Error::Forbidden(format!("Image path outside save root: {}", requested)));
    }
    Ok(resolved)
}

/// Check a content-endpoint path against its allow-list
pub fn resolve_allowed_content_path(requested: &str) -> Result<PathBuf> {
    if !FILE_CONTENT_PREFIXES.iter().any(|p| requested.starts_with(p)) {
        return Err(Error::Forbidden(format!("Path not allowed: {}", requested)));
    }
    join_clean(Path::new("/"), requested)
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Content type for downloadable documents
pub fn content_type_for(path: &Path) -> String {
    let explicit = match extension_of(path).as_str() {
        "xlsx" => Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        "xls" => Some("application/vnd.ms-excel"),
        "docx" => Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
        "doc" => Some("application/msword"),
        "pdf" => Some("application/pdf"),
        _ => None,
    };
    match explicit {
        Some(ct) => ct.to_string(),
        None => mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

/// Content type for proxied images, `None` when the file is not an image
pub fn image_content_type(path: &Path) -> Option<&'static str> {
    match extension_of(path).as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;

    fn layout() -> StorageLayout {
        StorageLayout::new("/app/public", "/app/data")
    }

    fn translator() -> PathTranslator {
        PathTranslator::new(PathsConfig::default().mappings)
    }

    #[test]
    fn test_file_proxy_allow_list() {
        let l = layout();
        assert_eq!(
            resolve_file_proxy_path("/my-doc-system-uploads/save/1/2/a.docx", &l).unwrap(),
            PathBuf::from("/app/public/save/1/2/a.docx")
        );
        assert_eq!(
            resolve_file_proxy_path("/public/save/1/2/t.xlsx", &l).unwrap(),
            PathBuf::from("/app/public/save/1/2/t.xlsx")
        );
        assert!(matches!(
            resolve_file_proxy_path("/etc/passwd", &l),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            resolve_file_proxy_path("/save/../../etc/passwd", &l),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_image_proxy_mapping() {
        let l = layout();
        let t = translator();
        let expected = PathBuf::from("/app/public/save/1/2/img/a.png");

        for input in [
            "/my-doc-system-uploads/save/1/2/img/a.png",
            "/home/cqj/my-doc-system-uploads/save/1/2/img/a.png",
            "/app/public/save/1/2/img/a.png",
            "1/2/img/a.png",
        ] {
            assert_eq!(resolve_image_proxy_path(input, &l, &t).unwrap(), expected, "{}", input);
        }

        assert!(resolve_image_proxy_path("/app/data/x.png", &l, &t).is_err());
        assert!(resolve_image_proxy_path("../upload/x.png", &l, &t).is_err());
        assert!(resolve_image_proxy_path("/etc/x.png", &l, &t).is_err());
    }

    #[test]
    fn test_content_allow_list() {
        assert!(resolve_allowed_content_path("/tmp/output/a.json").is_ok());
        assert!(resolve_allowed_content_path("/tmp/other/a.json").is_err());
        assert!(resolve_allowed_content_path("/tmp/output/../../etc/passwd").is_err());
    }

    #[test]
    fn test_content_types() {
        assert_eq!(
            content_type_for(Path::new("a.XLSX")),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
        assert_eq!(content_type_for(Path::new("a.txt")), "text/plain");
        assert_eq!(image_content_type(Path::new("a.JPG")), Some("image/jpeg"));
        assert_eq!(image_content_type(Path::new("a.docx")), None);
    }
}
