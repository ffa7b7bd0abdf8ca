//! Regular-file traversal of a local backup directory.
//!
//! Only regular files are reported. Directories are implied by the file
//! paths, and symlinks are never followed or archived.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the walked root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Self> {
        let metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        Ok(Self {
            path,
            relative_path,
            size: metadata.len(),
        })
    }

    /// Relative path with `/` separators, as stored in archives.
    pub fn archive_name(&self) -> String {
        self.relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Walk a directory tree with a callback for each regular file.
///
/// The first error, from the walk or from the callback, stops the walk.
pub fn walk_directory_with_callback<F>(root: &Path, mut callback: F) -> std::io::Result<()>
where
    F: FnMut(&FileInfo) -> std::io::Result<()>,
{
    let walker = WalkDir::new(root).follow_links(false).sort_by_file_name();

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        callback(&FileInfo::from_entry(&entry, root)?)?;
    }

    Ok(())
}

/// Walk a directory tree and collect all regular files
pub fn walk_directory(root: &Path) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();
    walk_directory_with_callback(root, |file| {
        files.push(file.clone());
        Ok(())
    })?;
    Ok(files)
}

/// Calculate total size of all regular files in a directory
pub fn calculate_total_size(root: &Path) -> std::io::Result<u64> {
    let mut total_size = 0u64;
    walk_directory_with_callback(root, |file| {
        total_size += file.size;
        Ok(())
    })?;
    Ok(total_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        assert!(walk_directory(temp_dir.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("shadow/default/t1"))?;
        fs::create_dir(temp_dir.path().join("empty"))?;
        fs::write(temp_dir.path().join("metadata.sql"), b"content1")?;
        fs::write(temp_dir.path().join("shadow/default/t1/data.bin"), b"content2")?;

        let names: Vec<String> = walk_directory(temp_dir.path())?
            .iter()
            .map(FileInfo::archive_name)
            .collect();
        assert_eq!(names, vec!["metadata.sql", "shadow/default/t1/data.bin"]);

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("real"), b"x")?;
        std::os::unix::fs::symlink(temp_dir.path().join("real"), temp_dir.path().join("link"))?;

        let files = walk_directory(temp_dir.path())?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].archive_name(), "real");
        Ok(())
    }

    #[test]
    fn test_calculate_total_size() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::write(temp_dir.path().join("file1.txt"), b"12345")?; // 5 bytes
        fs::write(temp_dir.path().join("file2.txt"), b"1234567")?; // 7 bytes

        assert_eq!(calculate_total_size(temp_dir.path())?, 12);
        Ok(())
    }

    #[test]
    fn test_callback_error_stops_walk() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("a"), b"1")?;
        fs::write(temp_dir.path().join("b"), b"2")?;

        let mut visited = 0;
        let result = walk_directory_with_callback(temp_dir.path(), |_| {
            visited += 1;
            Err(std::io::Error::other("stop"))
        });
        assert!(result.is_err());
        assert_eq!(visited, 1);
        Ok(())
    }
}
