use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use thiserror::Error;

const INDEXABLE_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("vault path is empty")]
    Empty,
    #[error("vault path contains unsupported component")]
    UnsupportedComponent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultEntry {
    pub path: String,
    pub modified_ms: i64,
}

/// The local document collection: a directory tree of text documents,
/// addressed by vault-relative POSIX-style paths ("Notes/Idea.md").
pub struct LocalVault {
    root: PathBuf,
    include_paths: Vec<String>,
}

impl LocalVault {
    pub fn new(root: PathBuf, include_paths: Vec<String>) -> Self {
        Self {
            root,
            include_paths,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_indexable(&self, rel: &str) -> bool {
        let extension = Path::new(rel)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");
        INDEXABLE_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str())
            && self.in_scope(rel)
    }

    fn in_scope(&self, rel: &str) -> bool {
        if self.include_paths.is_empty() {
            return true;
        }
        self.include_paths.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            rel == prefix || rel.starts_with(&format!("{prefix}/"))
        })
    }

    /// Maps a vault-relative path under the root, rejecting traversal
    /// components.
    pub fn abs_path(&self, rel: &str) -> Result<PathBuf, VaultError> {
        if rel.is_empty() {
            return Err(VaultError::Empty);
        }
        let mut out = self.root.clone();
        for component in Path::new(rel).components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => continue,
                Component::RootDir | Component::ParentDir | Component::Prefix(_) => {
                    return Err(VaultError::UnsupportedComponent);
                }
            }
        }
        Ok(out)
    }

    pub fn rel_path(&self, abs: &Path) -> Option<String> {
        let relative = abs.strip_prefix(&self.root).ok()?;
        Some(relative.to_string_lossy().replace('\\', "/"))
    }

    /// Enumerates every indexable document under the root, honoring the
    /// include-path filters. Hidden directories (`.obsidian`, `.git`) are
    /// skipped. Deterministic path order.
    pub async fn enumerate(&self) -> Result<Vec<VaultEntry>, VaultError> {
        let mut entries = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut reader = match tokio::fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(item) = reader.next_entry().await? {
                let name = item.file_name();
                if name.to_string_lossy().starts_with('.') {
                    continue;
                }
                let file_type = item.file_type().await?;
                if file_type.is_dir() {
                    pending.push(item.path());
                    continue;
                }
                let Some(rel) = self.rel_path(&item.path()) else {
                    continue;
                };
                if !self.is_indexable(&rel) {
                    continue;
                }
                let metadata = item.metadata().await?;
                entries.push(VaultEntry {
                    path: rel,
                    modified_ms: modified_ms_from(&metadata),
                });
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    pub async fn read(&self, rel: &str) -> Result<String, VaultError> {
        let path = self.abs_path(rel)?;
        Ok(tokio::fs::read_to_string(path).await?)
    }

    pub async fn modified_ms(&self, rel: &str) -> Result<i64, VaultError> {
        let path = self.abs_path(rel)?;
        let metadata = tokio::fs::metadata(path).await?;
        Ok(modified_ms_from(&metadata))
    }

    pub async fn exists(&self, rel: &str) -> bool {
        match self.abs_path(rel) {
            Ok(path) => tokio::fs::metadata(path).await.is_ok(),
            Err(_) => false,
        }
    }
}

fn modified_ms_from(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
