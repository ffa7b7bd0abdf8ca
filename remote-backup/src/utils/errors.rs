//! Error types for remote backup transfers.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Can't connect to {backend}: {message}")]
    Connection { backend: String, message: String },

    #[error("Transport error on '{key}': {source}")]
    Transport {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("'{key}' is not found on remote storage")]
    NotFound { key: String },

    #[error("'{key}' already exists on remote storage")]
    AlreadyExists { key: String },

    #[error("Upload of '{backup}' failed: {source}")]
    Upload {
        backup: String,
        #[source]
        source: Box<BackupError>,
    },

    #[error("Download of '{backup}' failed: {source}")]
    Download {
        backup: String,
        #[source]
        source: Box<BackupError>,
    },

    #[error("Backup chain of '{backup}' is corrupted at {}: {reason}", path.display())]
    ChainCorruption {
        backup: String,
        path: PathBuf,
        reason: String,
    },

    #[error("I/O error on {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid archive entry '{entry}': {reason}")]
    InvalidEntry { entry: String, reason: String },

    #[error("Invalid meta file: {0}")]
    InvalidMetaFile(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackupError {
    pub fn transport(key: impl Into<String>, source: io::Error) -> Self {
        BackupError::Transport {
            key: key.into(),
            source,
        }
    }

    pub fn local(path: impl Into<PathBuf>, source: io::Error) -> Self {
        BackupError::LocalIo {
            path: path.into(),
            source,
        }
    }

    pub fn upload(backup: impl Into<String>, source: BackupError) -> Self {
        BackupError::Upload {
            backup: backup.into(),
            source: Box::new(source),
        }
    }

    pub fn download(backup: impl Into<String>, source: BackupError) -> Self {
        BackupError::Download {
            backup: backup.into(),
            source: Box::new(source),
        }
    }

    /// True when the error (or the error it wraps) reports a missing remote object.
    pub fn is_not_found(&self) -> bool {
        match self {
            BackupError::NotFound { .. } => true,
            BackupError::Upload { source, .. } | BackupError::Download { source, .. } => {
                source.is_not_found()
            }
            _ => false,
        }
    }

    /// True for chain corruption, wrapped or not.
    pub fn is_chain_corruption(&self) -> bool {
        match self {
            BackupError::ChainCorruption { .. } => true,
            BackupError::Upload { source, .. } | BackupError::Download { source, .. } => {
                source.is_chain_corruption()
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_not_found() {
        let err = BackupError::download(
            "bk1",
            BackupError::NotFound {
                key: "backups/bk1.tar.gz".to_string(),
            },
        );
        assert!(err.is_not_found());
        assert!(!err.is_chain_corruption());
        assert!(err.to_string().contains("bk1"));
        assert!(err.to_string().contains("backups/bk1.tar.gz"));
    }

    #[test]
    fn test_transport_carries_key() {
        let err = BackupError::transport("backups/bk2/shadow/x", io::Error::other("reset"));
        assert_eq!(
            err.to_string(),
            "Transport error on 'backups/bk2/shadow/x': reset"
        );
    }
}
