//! Filesystem-tree backend.
//!
//! Object keys are `/`-separated paths under a root directory. Uploads land
//! in a hidden `.name.partial` sibling and are renamed into place only once
//! the body stream has been fully consumed.

use super::{BoxReader, RemoteFile, RemoteStorage};
use crate::{BackupError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject storage keys that could escape the root.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let unsafe_key = |reason: &str| BackupError::InvalidEntry {
            entry: key.to_string(),
            reason: reason.to_string(),
        };
        if key.is_empty() {
            return Err(unsafe_key("empty storage key"));
        }
        if key.starts_with('/') || key.contains('\\') {
            return Err(unsafe_key("storage key must be a relative '/'-separated path"));
        }
        if Path::new(key)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(unsafe_key("storage key contains traversal components"));
        }
        Ok(self.root.join(key))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    fn remote_file(&self, key: String, metadata: &std::fs::Metadata) -> RemoteFile {
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
        RemoteFile {
            name: key,
            size: metadata.len(),
            last_modified,
        }
    }

    fn scan(&self, prefix: &str) -> Result<Vec<RemoteFile>> {
        // Only the directory part of the prefix can be walked; the rest is a key filter.
        let start = match prefix.rfind('/') {
            Some(idx) => self.resolve(&prefix[..idx])?,
            None => self.root.clone(),
        };
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&start).follow_links(false) {
            let entry = entry.map_err(|e| {
                BackupError::transport(prefix, io::Error::other(e.to_string()))
            })?;
            if !entry.file_type().is_file() || is_partial(entry.file_name()) {
                continue;
            }
            let Some(key) = self.key_for(entry.path()) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            let metadata = entry
                .metadata()
                .map_err(|e| BackupError::transport(&key, io::Error::other(e.to_string())))?;
            files.push(self.remote_file(key, &metadata));
        }
        Ok(files)
    }
}

fn is_partial(name: &std::ffi::OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') && name.ends_with(".partial")
}

fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.partial", name))
}

#[async_trait]
impl RemoteStorage for LocalStorage {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn connect(&self) -> Result<()> {
        let connection_error = |message: String| BackupError::Connection {
            backend: self.kind().to_string(),
            message,
        };
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| connection_error(format!("{}: {}", self.root.display(), e)))?;
        let metadata = tokio::fs::metadata(&self.root)
            .await
            .map_err(|e| connection_error(format!("{}: {}", self.root.display(), e)))?;
        if !metadata.is_dir() {
            return Err(connection_error(format!(
                "'{}' is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }

    async fn walk(&self, prefix: &str, visit: &mut (dyn FnMut(RemoteFile) + Send)) -> Result<()> {
        let storage = LocalStorage::new(self.root.clone());
        let owned_prefix = prefix.to_string();
        let files = tokio::task::spawn_blocking(move || storage.scan(&owned_prefix))
            .await
            .map_err(|e| BackupError::transport(prefix, io::Error::other(e.to_string())))??;
        for file in files {
            visit(file);
        }
        Ok(())
    }

    async fn stat_file(&self, key: &str) -> Result<RemoteFile> {
        let path = self.resolve(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(self.remote_file(key.to_string(), &metadata)),
            Ok(_) => Err(BackupError::NotFound {
                key: key.to_string(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BackupError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(BackupError::transport(key, e)),
        }
    }

    async fn get_file_reader(&self, key: &str) -> Result<BoxReader> {
        let path = self.resolve(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BackupError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(BackupError::transport(key, e)),
        }
    }

    async fn put_file(&self, key: &str, mut body: BoxReader) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BackupError::transport(key, e))?;
        }

        let partial = partial_path(&path);
        let written = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            tokio::io::copy(&mut body, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            tokio::fs::rename(&partial, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(BackupError::transport(key, e));
        }
        Ok(())
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BackupError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(BackupError::transport(key, e)),
        }
    }
}
