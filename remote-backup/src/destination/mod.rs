//! Backup destination: one remote storage location holding many backups.
//!
//! A destination pairs a [`RemoteStorage`] backend with a key prefix and a
//! compression format. Single-file backups live at
//! `<path>/<name>.<extension>`; the catalog also recognises the exploded
//! `<path>/<name>/{metadata,shadow}/...` layout.

pub mod catalog;
pub mod download;
pub mod retention;
pub mod upload;

use crate::archive::CompressionFormat;
use crate::config::Config;
use crate::storage::{join_key, LocalStorage, RemoteStorage};
use crate::transfer::DEFAULT_BUFFER_SIZE;
use crate::{BackupError, Result};
use std::sync::Arc;
use tracing::debug;

pub use catalog::{render_backups, Backup, BackupLayout, ListFormat};
pub use download::DownloadSummary;
pub use upload::UploadSummary;

pub struct BackupDestination {
    storage: Arc<dyn RemoteStorage>,
    path: String,
    compression: CompressionFormat,
    compression_level: Option<i32>,
    backups_to_keep: i64,
    buffer_size: usize,
    show_progress: bool,
}

impl BackupDestination {
    pub fn new(storage: Arc<dyn RemoteStorage>, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into().trim_matches('/').to_string(),
            compression: CompressionFormat::default(),
            compression_level: None,
            backups_to_keep: 0,
            buffer_size: DEFAULT_BUFFER_SIZE,
            show_progress: false,
        }
    }

    /// Build the destination described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let storage: Arc<dyn RemoteStorage> = match config.general.remote_storage.as_str() {
            "local" => Arc::new(LocalStorage::new(config.local.root.clone())),
            other => {
                return Err(BackupError::Config(format!(
                    "storage type '{}' not supported",
                    other
                )))
            }
        };
        let compression: CompressionFormat = config.local.compression_format.parse()?;

        Ok(Self::new(storage, config.local.path.clone())
            .with_compression(compression, Some(config.local.compression_level))
            .with_backups_to_keep(config.general.backups_to_keep_remote)
            .with_buffer_size(config.general.buffer_size)
            .with_progress(!config.general.disable_progress_bar))
    }

    pub fn with_compression(mut self, format: CompressionFormat, level: Option<i32>) -> Self {
        self.compression = format;
        self.compression_level = level;
        self
    }

    pub fn with_backups_to_keep(mut self, keep: i64) -> Self {
        self.backups_to_keep = keep;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    pub async fn connect(&self) -> Result<()> {
        debug!("Connecting to {} storage", self.storage.kind());
        self.storage.connect().await
    }

    pub fn kind(&self) -> &'static str {
        self.storage.kind()
    }

    pub fn storage(&self) -> &Arc<dyn RemoteStorage> {
        &self.storage
    }

    /// Key prefix inside the backend, without surrounding slashes.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn compression(&self) -> CompressionFormat {
        self.compression
    }

    pub fn backups_to_keep(&self) -> i64 {
        self.backups_to_keep
    }

    /// Remote key of the single-file archive for `backup_name`.
    pub fn archive_key(&self, backup_name: &str) -> String {
        join_key(
            &self.path,
            &format!("{}.{}", backup_name, self.compression.extension()),
        )
    }

    /// Catalog entry for `name`, or `NotFound`.
    pub async fn find_backup(&self, name: &str) -> Result<Backup> {
        self.backup_list()
            .await?
            .into_iter()
            .find(|backup| backup.name == name)
            .ok_or_else(|| BackupError::NotFound {
                key: name.to_string(),
            })
    }
}
