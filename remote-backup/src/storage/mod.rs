//! Remote object storage capability.
//!
//! Every backend (object store with prefix keys, blob store, segmented
//! container store, FTP tree) exposes the same small surface. The transfer
//! pipeline, the catalog builder and retention only talk to this trait.

pub mod local;
pub mod memory;

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::pin::Pin;
use tokio::io::AsyncRead;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// Readable byte stream bound to a remote object.
pub type BoxReader = Pin<Box<dyn AsyncRead + Send>>;

/// A single object as reported by a backend listing or stat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Full object key
    pub name: String,

    /// Object size in bytes
    pub size: u64,

    /// Last modification time reported by the backend
    pub last_modified: DateTime<Utc>,
}

#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Human-readable backend identifier, for diagnostics only.
    fn kind(&self) -> &'static str;

    /// Establish or refresh the backend session. Idempotent.
    async fn connect(&self) -> Result<()>;

    /// Visit every object whose key starts with `prefix`, in no particular order.
    ///
    /// Objects delivered before a failure are not rolled back.
    async fn walk(&self, prefix: &str, visit: &mut (dyn FnMut(RemoteFile) + Send)) -> Result<()>;

    /// Size and modification time of `key`, or `NotFound`.
    async fn stat_file(&self, key: &str) -> Result<RemoteFile>;

    /// Open a read stream over `key`.
    async fn get_file_reader(&self, key: &str) -> Result<BoxReader>;

    /// Store `body` under `key`, consuming it fully.
    ///
    /// A read error from `body` must fail the call and must not leave a
    /// visible object behind.
    async fn put_file(&self, key: &str, body: BoxReader) -> Result<()>;

    /// Remove `key`, or fail with `NotFound`.
    async fn delete_file(&self, key: &str) -> Result<()>;
}

/// Collect a full listing under `prefix`.
pub async fn list_files(storage: &dyn RemoteStorage, prefix: &str) -> Result<Vec<RemoteFile>> {
    let mut files = Vec::new();
    storage
        .walk(prefix, &mut |file: RemoteFile| files.push(file))
        .await?;
    Ok(files)
}

/// Join a configured path prefix and a relative key with a single `/`.
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("", "bk1.tar"), "bk1.tar");
        assert_eq!(join_key("backups", "bk1.tar"), "backups/bk1.tar");
        assert_eq!(join_key("backups/", "/bk1.tar"), "backups/bk1.tar");
    }

    #[tokio::test]
    async fn test_list_files_collects_walk() {
        let storage = MemoryStorage::new();
        storage.insert("a/x", b"1".to_vec());
        storage.insert("a/y", b"22".to_vec());
        storage.insert("b/z", b"333".to_vec());

        let mut names: Vec<String> = list_files(&storage, "a/")
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a/x", "a/y"]);
    }
}
