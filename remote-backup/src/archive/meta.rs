//! Incremental chain metadata stored inside every incremental archive.

use crate::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

/// Reserved archive entry name. Never extracted to disk.
pub const META_FILE_NAME: &str = "meta.json";

/// Chain record written as the final entry of an incremental archive.
///
/// `hardlinks` lists the relative paths that were omitted from the archive
/// because the parent backup already holds the same physical file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFile {
    #[serde(default)]
    pub required_backup: String,

    #[serde(default)]
    pub hardlinks: Vec<String>,
}

impl MetaFile {
    pub fn new(required_backup: impl Into<String>, hardlinks: Vec<String>) -> Self {
        Self {
            required_backup: required_backup.into(),
            hardlinks,
        }
    }

    /// Parse and validate an embedded meta entry.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let meta: MetaFile = serde_json::from_slice(data)?;
        meta.validate()?;
        Ok(meta)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn is_incremental(&self) -> bool {
        !self.required_backup.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.hardlinks.is_empty() && self.required_backup.is_empty() {
            return Err(BackupError::InvalidMetaFile(
                "hardlinks listed without a required backup".to_string(),
            ));
        }
        if self.is_incremental() && !is_plain_name(&self.required_backup) {
            return Err(BackupError::InvalidMetaFile(format!(
                "required backup '{}' is not a plain backup name",
                self.required_backup
            )));
        }
        for link in &self.hardlinks {
            if !is_safe_relative(link) {
                return Err(BackupError::InvalidMetaFile(format!(
                    "hardlink path '{}' escapes the backup directory",
                    link
                )));
            }
        }
        Ok(())
    }
}

/// A backup name usable as a single directory next to its children.
fn is_plain_name(name: &str) -> bool {
    name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// True for non-empty relative paths made only of normal components.
pub fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_keys() {
        let meta = MetaFile::new("bk1", vec!["shadow/data.bin".to_string()]);
        let json: serde_json::Value = serde_json::from_slice(&meta.to_json().unwrap()).unwrap();
        assert_eq!(json["required_backup"], "bk1");
        assert_eq!(json["hardlinks"][0], "shadow/data.bin");

        let parsed = MetaFile::from_slice(&meta.to_json().unwrap()).unwrap();
        assert_eq!(parsed, meta);
        assert!(parsed.is_incremental());
    }

    #[test]
    fn test_missing_keys_default_to_empty() {
        let meta = MetaFile::from_slice(b"{}").unwrap();
        assert!(!meta.is_incremental());
        assert!(meta.hardlinks.is_empty());
    }

    #[test]
    fn test_rejects_orphan_hardlinks() {
        let err = MetaFile::from_slice(br#"{"required_backup":"","hardlinks":["a"]}"#).unwrap_err();
        assert!(matches!(err, BackupError::InvalidMetaFile(_)));
    }

    #[test]
    fn test_rejects_escaping_paths() {
        assert!(MetaFile::new("bk1", vec!["../etc/passwd".to_string()])
            .validate()
            .is_err());
        assert!(MetaFile::new("bk1", vec!["/abs".to_string()]).validate().is_err());
        assert!(MetaFile::new("../bk1", vec![]).validate().is_err());
        assert!(MetaFile::new(".", vec!["a".to_string()]).validate().is_err());
        assert!(MetaFile::new("..", vec![]).validate().is_err());
        assert!(MetaFile::new("a\\b", vec![]).validate().is_err());
        assert!(MetaFile::new("bk.1", vec!["a".to_string()]).validate().is_ok());
        assert!(matches!(
            MetaFile::from_slice(b"not json"),
            Err(BackupError::Serialization(_))
        ));
    }
}
