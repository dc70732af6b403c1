//! Container/host path translation
//!
//! The gateway and the Python services see the same files under different
//! mount points. Translation is purely textual prefix substitution against a
//! fixed table; nothing here touches the filesystem.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One `container_prefix <-> host_prefix` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    pub container_prefix: String,
    pub host_prefix: String,
}

impl PathMapping {
    pub fn new(container_prefix: impl Into<String>, host_prefix: impl Into<String>) -> Self {
        Self {
            container_prefix: normalize_prefix(container_prefix.into()),
            host_prefix: normalize_prefix(host_prefix.into()),
        }
    }
}

fn normalize_prefix(prefix: String) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Returns the remainder of `path` after `prefix` when the prefix ends on a
/// component boundary (`/app/data` matches `/app/data/x`, not `/app/database`).
fn strip_component_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

#[derive(Clone, Copy)]
enum Direction {
    ToHost,
    ToContainer,
}

impl Direction {
    /// `(from, to)` prefixes of a mapping in this direction
    fn endpoints(self, mapping: &PathMapping) -> (&str, &str) {
        match self {
            Direction::ToHost => (mapping.container_prefix.as_str(), mapping.host_prefix.as_str()),
            Direction::ToContainer => (mapping.host_prefix.as_str(), mapping.container_prefix.as_str()),
        }
    }
}

/// Prefix-substitution translator between the two mount namespaces
#[derive(Debug, Clone)]
pub struct PathTranslator {
    mappings: Vec<PathMapping>,
}

impl PathTranslator {
    pub fn new(mappings: Vec<PathMapping>) -> Self {
        let mappings = mappings
            .into_iter()
            .map(|m| PathMapping::new(m.container_prefix, m.host_prefix))
            .collect();
        Self { mappings }
    }

    pub fn mappings(&self) -> &[PathMapping] {
        &self.mappings
    }

    /// Translate a container path into host form.
    ///
    /// Paths already under a host prefix are returned unchanged. Paths under
    /// no known prefix fail with [`Error::UnmappedPath`].
    pub fn to_host(&self, path: &str) -> Result<String> {
        self.translate(path, Direction::ToHost)
    }

    /// Translate a host path into container form.
    pub fn to_container(&self, path: &str) -> Result<String> {
        self.translate(path, Direction::ToContainer)
    }

    /// Host translation that passes unknown paths through untouched.
    pub fn to_host_lossy(&self, path: &str) -> String {
        match self.to_host(path) {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!(path, "No path mapping, passing through unchanged");
                path.to_string()
            }
        }
    }

    fn translate(&self, path: &str, direction: Direction) -> Result<String> {
        let best = self
            .mappings
            .iter()
            .filter_map(|m| {
                let (from, to) = direction.endpoints(m);
                strip_component_prefix(path, from).map(|rest| (from.len(), to, rest))
            })
            .max_by_key(|(len, _, _)| *len);

        if let Some((_, to, rest)) = best {
            return Ok(format!("{}{}", to, rest));
        }

        let already_translated = self.mappings.iter().any(|m| {
            let (_, to) = direction.endpoints(m);
            strip_component_prefix(path, to).is_some()
        });

        if already_translated {
            Ok(path.to_string())
        } else {
            Err(Error::UnmappedPath(path.to_string()))
        }
    }
}
