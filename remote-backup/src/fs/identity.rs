//! Physical file identity.
//!
//! Two paths are the same file when they share device and inode, which is
//! how a local incremental backup shares unchanged parts with its parent.

use std::fs::Metadata;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub dev: u64,
    pub ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &Metadata) -> Option<Self> {
        None
    }
}

/// True when `other` exists and is the same physical file as `metadata`.
///
/// A missing `other` is not an error. On platforms without inode numbers
/// nothing is ever the same file.
pub fn same_file(metadata: &Metadata, other: &Path) -> io::Result<bool> {
    let Some(identity) = FileIdentity::from_metadata(metadata) else {
        return Ok(false);
    };
    match std::fs::symlink_metadata(other) {
        Ok(other_meta) if other_meta.is_file() => {
            Ok(FileIdentity::from_metadata(&other_meta) == Some(identity))
        }
        Ok(_) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
