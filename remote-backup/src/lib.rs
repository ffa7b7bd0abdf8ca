//! Remote Backup Library
//!
//! Streams local database backups to and from remote object storage as
//! compressed tar archives, with incremental chains linked by hardlinks.

pub mod archive;
pub mod config;
pub mod destination;
pub mod fs;
pub mod storage;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use archive::{CompressionFormat, MetaFile};
pub use config::Config;
pub use destination::{Backup, BackupDestination, DownloadSummary, ListFormat, UploadSummary};
pub use storage::{RemoteFile, RemoteStorage};
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
