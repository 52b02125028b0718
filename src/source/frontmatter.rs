//! Markdown files whose leading `---` YAML block is the metadata tree.

use super::MetadataSource;
use crate::error::MetaBindError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::{
    fs::read_to_string,
    io,
    path::{Component, Path, PathBuf},
};

pub const FRONTMATTER_STORAGE_TYPE: &str = "frontmatter";

static FRONTMATTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^---[ \t]*\r?\n(?:(?s:(.*?))\r?\n)?---[ \t]*(?:\r?\n|$)")
        .expect("frontmatter pattern is valid")
});

/// Parse the frontmatter block of `text` into a tree. No block, or an empty one, is `{}`.
pub fn parse_frontmatter(text: &str) -> Result<Value, MetaBindError> {
    let yaml = FRONTMATTER
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or_default();
    if yaml.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    match serde_yaml::from_str::<Value>(yaml)? {
        Value::Null => Ok(Value::Object(Map::new())),
        value => Ok(value),
    }
}

/// Replace (or insert) the frontmatter block of `text` with `data`, keeping the body.
pub fn render_frontmatter(text: &str, data: &Value) -> Result<String, MetaBindError> {
    let existing = FRONTMATTER.find(text);
    let body = existing.map(|m| &text[m.end()..]).unwrap_or(text);
    let is_empty = data.as_object().map(Map::is_empty).unwrap_or(data.is_null());
    if is_empty {
        return Ok(match existing {
            Some(_) => format!("---\n---\n{body}"),
            None => text.to_string(),
        });
    }
    let yaml = serde_yaml::to_string(data)?;
    Ok(format!("---\n{yaml}---\n{body}"))
}

/// Frontmatter of files below `root`, addressed by root-relative storage paths.
#[derive(Debug, Clone)]
pub struct FrontmatterSource {
    root: PathBuf,
}

impl FrontmatterSource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        FrontmatterSource {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a storage path onto a file below the root, refusing paths that leave it.
    pub fn file_path(&self, storage_path: &str) -> Result<PathBuf, MetaBindError> {
        let relative = Path::new(storage_path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || storage_path.is_empty() {
            return Err(MetaBindError::NotFound(format!(
                "storage path '{storage_path}' is not below {:?}",
                self.root
            )));
        }
        Ok(self.root.join(relative))
    }

    /// The storage path of a file below the root, using '/' separators.
    pub fn storage_path(&self, file_path: &Path) -> Option<String> {
        let relative = file_path.strip_prefix(&self.root).ok()?;
        let parts = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl MetadataSource for FrontmatterSource {
    fn storage_type(&self) -> &str {
        FRONTMATTER_STORAGE_TYPE
    }

    fn read_external(&self, cache_key: &str) -> Result<Value, MetaBindError> {
        let path = self.file_path(cache_key)?;
        tracing::debug!("Reading frontmatter from {:?}", path);
        match read_to_string(&path) {
            Ok(text) => parse_frontmatter(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Value::Object(Map::new())),
            Err(e) => Err(e.into()),
        }
    }

    async fn sync_external(&self, cache_key: &str, data: &Value) -> Result<(), MetaBindError> {
        let path = self.file_path(cache_key)?;
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let rendered = render_frontmatter(&text, data)?;
        if rendered == text {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tracing::debug!("Writing frontmatter to {:?}", path);
        tokio::fs::write(&path, rendered).await?;
        Ok(())
    }
}
