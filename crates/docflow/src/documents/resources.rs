//! Image and table files produced for a task

use serde::Serialize;
use std::path::Path;

use crate::error::Result;
use crate::storage::{ensure_component, StorageLayout};

const IMAGE_DIR: &str = "img";
const TABLE_DIR: &str = "table";

/// Label of resources found directly under the task directory
pub const ROOT_GROUP: &str = "资源";

/// One image or table file
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEntry {
    pub name: String,
    pub url: String,
    /// Grouping label: [`ROOT_GROUP`] or the subdirectory name
    pub file_name: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TaskResources {
    pub images: Vec<ResourceEntry>,
    pub tables: Vec<ResourceEntry>,
}

impl TaskResources {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.tables.is_empty()
    }
}

async fn files_with_extension(dir: &Path, extension: &str) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return names;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.to_lowercase().ends_with(extension) {
            names.push(name);
        }
    }
    names.sort();
    names
}

/// List `img/*.png` and `table/*.xlsx` of a task.
///
/// When the task directory itself has none, each direct subdirectory is
/// searched one level down instead.
pub async fn list_resources(layout: &StorageLayout, user: &str, task_id: &str) -> Result<TaskResources> {
    let user = ensure_component("agentUserId", user)?;
    let task_id = ensure_component("taskId", task_id)?;
    let task_dir = layout.save_dir(user, task_id);

    let mut resources = TaskResources::default();
    if !tokio::fs::try_exists(&task_dir).await.unwrap_or(false) {
        return Ok(resources);
    }

    collect(layout, &mut resources, &task_dir, user, task_id, None).await;

    if resources.is_empty() {
        let mut subdirs = Vec::new();
        let mut entries = tokio::fs::read_dir(&task_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != IMAGE_DIR && name != TABLE_DIR && entry.file_type().await?.is_dir() {
                subdirs.push(name);
            }
        }
        subdirs.sort();
        for sub in subdirs {
            let dir = task_dir.join(&sub);
            collect(layout, &mut resources, &dir, user, task_id, Some(&sub)).await;
        }
    }

    tracing::debug!(
        user,
        task_id,
        images = resources.images.len(),
        tables = resources.tables.len(),
        "Listed task resources"
    );
    Ok(resources)
}

async fn collect(
    layout: &StorageLayout,
    resources: &mut TaskResources,
    dir: &Path,
    user: &str,
    task_id: &str,
    subdir: Option<&str>,
) {
    let group = subdir.unwrap_or(ROOT_GROUP).to_string();
    let sub = subdir.unwrap_or("");

    for name in files_with_extension(&dir.join(IMAGE_DIR), ".png").await {
        resources.images.push(ResourceEntry {
            url: layout.save_url(&[user, task_id, sub, IMAGE_DIR, &name]),
            name,
            file_name: group.clone(),
        });
    }
    for name in files_with_extension(&dir.join(TABLE_DIR), ".xlsx").await {
        resources.tables.push(ResourceEntry {
            url: layout.save_url(&[user, task_id, sub, TABLE_DIR, &name]),
            name,
            file_name: group.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[tokio::test]
    async fn test_root_resources_win() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("public"), dir.path().join("data"));
        let task = layout.save_dir("123", "5");
        touch(&task.join("img/a.PNG"));
        touch(&task.join("img/notes.txt"));
        touch(&task.join("table/t.xlsx"));
        touch(&task.join("part1/img/deep.png"));

        let res = list_resources(&layout, "123", "5").await.unwrap();
        assert_eq!(res.images.len(), 1);
        assert_eq!(res.images[0].url, "/save/123/5/img/a.PNG");
        assert_eq!(res.images[0].file_name, ROOT_GROUP);
        assert_eq!(res.tables[0].url, "/save/123/5/table/t.xlsx");
    }

    #[tokio::test]
    async fn test_subdirectory_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("public"), dir.path().join("data"));
        let task = layout.save_dir("123", "6");
        touch(&task.join("part1/img/deep.png"));
        touch(&task.join("part2/table/t 1.xlsx"));

        let res = list_resources(&layout, "123", "6").await.unwrap();
        assert_eq!(res.images[0].url, "/save/123/6/part1/img/deep.png");
        assert_eq!(res.images[0].file_name, "part1");
        assert_eq!(res.tables[0].url, "/save/123/6/part2/table/t%201.xlsx");

        let missing = list_resources(&layout, "123", "404").await.unwrap();
        assert!(missing.is_empty());
    }
}
