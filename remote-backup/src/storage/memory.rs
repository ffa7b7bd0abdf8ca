//! In-process object store.
//!
//! Backs the pipeline tests and dry runs. Objects live in a sorted map, so
//! walks are deterministic. Failures can be injected per key.

use super::{BoxReader, RemoteFile, RemoteStorage};
use crate::{BackupError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::io::AsyncReadExt;

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, MemoryObject>>,
    failing_deletes: Mutex<HashSet<String>>,
    walk_failure_after: Mutex<Option<usize>>,
    connects: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object stamped with the current time.
    pub fn insert(&self, key: &str, data: impl Into<Bytes>) {
        self.insert_at(key, data, Utc::now());
    }

    /// Store an object with an explicit modification time.
    pub fn insert_at(&self, key: &str, data: impl Into<Bytes>, last_modified: DateTime<Utc>) {
        lock(&self.objects).insert(
            key.to_string(),
            MemoryObject {
                data: data.into(),
                last_modified,
            },
        );
    }

    /// Overwrite the modification time of an existing object.
    pub fn set_last_modified(&self, key: &str, last_modified: DateTime<Utc>) -> bool {
        match lock(&self.objects).get_mut(key) {
            Some(object) => {
                object.last_modified = last_modified;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        lock(&self.objects).get(key).map(|o| o.data.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    /// Make every delete of `key` fail with a transport error.
    pub fn fail_delete(&self, key: &str) {
        lock(&self.failing_deletes).insert(key.to_string());
    }

    /// Make walks fail after delivering `count` objects.
    pub fn fail_walk_after(&self, count: usize) {
        *lock(&self.walk_failure_after) = Some(count);
    }

    /// Number of `connect()` calls seen so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RemoteStorage for MemoryStorage {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn walk(&self, prefix: &str, visit: &mut (dyn FnMut(RemoteFile) + Send)) -> Result<()> {
        let snapshot: Vec<RemoteFile> = lock(&self.objects)
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| RemoteFile {
                name: key.clone(),
                size: object.data.len() as u64,
                last_modified: object.last_modified,
            })
            .collect();
        let fail_after = *lock(&self.walk_failure_after);

        for (delivered, file) in snapshot.into_iter().enumerate() {
            if fail_after == Some(delivered) {
                return Err(BackupError::transport(
                    prefix,
                    io::Error::other("listing interrupted"),
                ));
            }
            visit(file);
        }
        Ok(())
    }

    async fn stat_file(&self, key: &str) -> Result<RemoteFile> {
        lock(&self.objects)
            .get(key)
            .map(|object| RemoteFile {
                name: key.to_string(),
                size: object.data.len() as u64,
                last_modified: object.last_modified,
            })
            .ok_or_else(|| BackupError::NotFound {
                key: key.to_string(),
            })
    }

    async fn get_file_reader(&self, key: &str) -> Result<BoxReader> {
        let data = self.get(key).ok_or_else(|| BackupError::NotFound {
            key: key.to_string(),
        })?;
        Ok(Box::pin(io::Cursor::new(data)))
    }

    async fn put_file(&self, key: &str, mut body: BoxReader) -> Result<()> {
        let mut data = Vec::new();
        body.read_to_end(&mut data)
            .await
            .map_err(|e| BackupError::transport(key, e))?;
        self.insert(key, data);
        Ok(())
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        if lock(&self.failing_deletes).contains(key) {
            return Err(BackupError::transport(
                key,
                io::Error::new(io::ErrorKind::PermissionDenied, "delete refused"),
            ));
        }
        match lock(&self.objects).remove(key) {
            Some(_) => Ok(()),
            None => Err(BackupError::NotFound {
                key: key.to_string(),
            }),
        }
    }
}
