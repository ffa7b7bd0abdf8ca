//! Streaming archive download and incremental chain restore.
//!
//! Each archive is pumped from the backend through the decoder into a
//! bounded pipe by an async task, while a blocking task extracts the tar
//! stream from the other end. The chain record is withheld from extraction
//! and names the parent backup, which is restored next into a sibling
//! directory. Once the whole chain is on disk, hardlinks are created
//! oldest level first, each level against its immediate parent.

use super::BackupDestination;
use crate::archive::meta::is_safe_relative;
use crate::archive::{MetaFile, META_FILE_NAME};
use crate::transfer::pipe::CHUNK_SIZE;
use crate::transfer::{pipe, PipeReader, ProgressCallback, ProgressReader, ProgressReporter};
use crate::{BackupError, Result};
use futures_util::StreamExt;
use std::collections::HashSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// Outcome of a successful download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Restored backups, the requested one first
    pub chain: Vec<String>,
    /// Regular files written from archives, across the chain
    pub files_extracted: usize,
    /// Bytes written from archives, across the chain
    pub bytes_extracted: u64,
    /// Files restored from a parent backup
    pub links_created: usize,
}

#[derive(Debug, Default)]
struct Extracted {
    files: usize,
    bytes: u64,
    meta: Option<MetaFile>,
}

struct ChainLevel {
    name: String,
    dir: PathBuf,
    hardlinks: Vec<String>,
}

impl BackupDestination {
    /// Restore backup `backup_name` into `local_root`, pulling in every
    /// ancestor it depends on.
    ///
    /// Ancestors land next to `local_root`, one directory per backup name.
    pub async fn compressed_stream_download(
        &self,
        backup_name: &str,
        local_root: &Path,
    ) -> Result<DownloadSummary> {
        self.connect()
            .await
            .map_err(|e| BackupError::download(backup_name, e))?;

        let mut summary = DownloadSummary::default();
        let mut levels: Vec<ChainLevel> = Vec::new();
        let mut seen = HashSet::new();
        let mut name = backup_name.to_string();
        let mut dir = local_root.to_path_buf();

        loop {
            if !seen.insert(name.clone()) {
                return Err(BackupError::ChainCorruption {
                    backup: backup_name.to_string(),
                    path: dir,
                    reason: format!("'{}' appears twice in its own chain", name),
                });
            }

            let extracted = self
                .download_archive(&name, &dir)
                .await
                .map_err(|e| BackupError::download(&name, e))?;
            summary.files_extracted += extracted.files;
            summary.bytes_extracted += extracted.bytes;
            summary.chain.push(name.clone());

            let meta = extracted.meta.unwrap_or_default();
            let required = meta.required_backup.clone();
            levels.push(ChainLevel {
                name: name.clone(),
                dir: dir.clone(),
                hardlinks: meta.hardlinks,
            });
            if required.is_empty() {
                break;
            }

            let Some(parent_dir) = local_root.parent() else {
                return Err(BackupError::ChainCorruption {
                    backup: backup_name.to_string(),
                    path: local_root.to_path_buf(),
                    reason: format!("no sibling directory available for '{}'", required),
                });
            };
            let next_dir = parent_dir.join(&required);
            if levels.iter().any(|level| level.dir == next_dir) {
                return Err(BackupError::ChainCorruption {
                    backup: backup_name.to_string(),
                    path: next_dir,
                    reason: format!("'{}' would be restored over another chain member", required),
                });
            }
            info!("'{}' requires '{}', downloading it into {}", name, required, next_dir.display());
            name = required;
            dir = next_dir;
        }

        // Oldest ancestor first: each level links against a fully restored parent.
        for index in (0..levels.len().saturating_sub(1)).rev() {
            let child = &levels[index];
            let parent = &levels[index + 1];
            if child.hardlinks.is_empty() {
                continue;
            }
            let job = LinkJob {
                backup: child.name.clone(),
                parent: parent.name.clone(),
                source_root: parent.dir.clone(),
                target_root: child.dir.clone(),
                paths: child.hardlinks.clone(),
            };
            summary.links_created += tokio::task::spawn_blocking(move || job.run())
                .await
                .map_err(|e| BackupError::local(&child.dir, io::Error::other(e.to_string())))??;
        }

        info!(
            "Downloaded '{}' ({} archives, {} files, {} links)",
            backup_name,
            summary.chain.len(),
            summary.files_extracted,
            summary.links_created
        );
        Ok(summary)
    }

    /// Download and extract one archive, without following its chain.
    async fn download_archive(&self, backup_name: &str, local_root: &Path) -> Result<Extracted> {
        let key = self.archive_key(backup_name);
        let stat = self.storage().stat_file(&key).await?;
        let source = self.storage().get_file_reader(&key).await?;
        debug!("Downloading {} ({} bytes) into {}", key, stat.size, local_root.display());

        let progress = ProgressReporter::new(
            format!("download {}", backup_name),
            stat.size,
            self.show_progress,
        );
        let reporter = progress.clone();
        let callback: ProgressCallback = Arc::new(move |n| reporter.report(n));
        let decoded = self
            .compression
            .decoder(Box::pin(ProgressReader::new(source, callback)));

        let (mut writer, reader) = pipe(self.buffer_size);
        let pump = tokio::spawn(async move {
            let mut stream = ReaderStream::with_capacity(decoded, CHUNK_SIZE);
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        if writer.send(bytes).await.is_err() {
                            // Extraction stopped early and reports its own error.
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        writer.fail(io::Error::new(e.kind(), e.to_string())).await;
                        return Err(e);
                    }
                }
            }
            Ok(())
        });

        let extractor = ArchiveExtractor {
            root: local_root.to_path_buf(),
            key: key.clone(),
        };
        let extracted = tokio::task::spawn_blocking(move || extractor.run(reader))
            .await
            .map_err(|e| BackupError::local(local_root, io::Error::other(e.to_string())))?;
        let pumped = pump
            .await
            .map_err(|e| BackupError::transport(&key, io::Error::other(e.to_string())))?;

        if let Err(e) = pumped {
            return Err(BackupError::transport(&key, e));
        }
        let extracted = extracted?;
        progress.finish();
        Ok(extracted)
    }
}

/// Blocking tar extraction from the pipe.
struct ArchiveExtractor {
    root: PathBuf,
    key: String,
}

impl ArchiveExtractor {
    fn run(&self, reader: PipeReader) -> Result<Extracted> {
        fs::create_dir_all(&self.root).map_err(|e| BackupError::local(&self.root, e))?;

        let mut archive = tar::Archive::new(reader);
        let mut extracted = Extracted::default();
        let entries = archive
            .entries()
            .map_err(|e| BackupError::transport(&self.key, e))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| BackupError::transport(&self.key, e))?;
            let name = entry
                .path()
                .map_err(|e| BackupError::transport(&self.key, e))?
                .to_string_lossy()
                .into_owned();
            let name = name.trim_start_matches("./").to_string();
            if (name.is_empty() || name == ".") && entry.header().entry_type().is_dir() {
                continue;
            }

            if name == META_FILE_NAME {
                let mut data = Vec::new();
                entry
                    .read_to_end(&mut data)
                    .map_err(|e| BackupError::transport(&self.key, e))?;
                extracted.meta = Some(MetaFile::from_slice(&data)?);
                continue;
            }
            if !is_safe_relative(&name) {
                return Err(BackupError::InvalidEntry {
                    entry: name,
                    reason: "path escapes the backup directory".to_string(),
                });
            }

            let dest = self.root.join(&name);
            match entry.header().entry_type() {
                tar::EntryType::Regular | tar::EntryType::Continuous => {
                    let size = self.write_file(&mut entry, &dest)?;
                    debug!("Extracted {} ({} bytes)", name, size);
                    extracted.files += 1;
                    extracted.bytes += size;
                }
                tar::EntryType::Directory => {
                    fs::create_dir_all(&dest).map_err(|e| BackupError::local(&dest, e))?;
                }
                other => {
                    return Err(BackupError::InvalidEntry {
                        entry: name,
                        reason: format!("unexpected entry type {:?}", other),
                    });
                }
            }
        }

        // Drain the trailer so the pump never sees a closed pipe on success.
        let mut rest = archive.into_inner();
        io::copy(&mut rest, &mut io::sink()).map_err(|e| BackupError::transport(&self.key, e))?;
        Ok(extracted)
    }

    fn write_file<R: Read>(&self, entry: &mut tar::Entry<'_, R>, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| BackupError::local(parent, e))?;
        }
        // Never write through an existing hardlink shared with another backup.
        remove_existing(dest)?;

        let mut file = fs::File::create(dest).map_err(|e| BackupError::local(dest, e))?;
        let size = io::copy(entry, &mut file).map_err(|e| BackupError::local(dest, e))?;
        if let Ok(mode) = entry.header().mode() {
            apply_mode(dest, mode).map_err(|e| BackupError::local(dest, e))?;
        }
        Ok(size)
    }
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

fn remove_existing(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BackupError::local(path, e)),
    }
}

/// Recreate the files a backup shares with its parent.
struct LinkJob {
    backup: String,
    parent: String,
    source_root: PathBuf,
    target_root: PathBuf,
    paths: Vec<String>,
}

impl LinkJob {
    fn run(self) -> Result<usize> {
        for relative in &self.paths {
            let source = self.source_root.join(relative);
            let target = self.target_root.join(relative);

            match fs::symlink_metadata(&source) {
                Ok(metadata) if metadata.is_file() => {}
                _ => {
                    return Err(BackupError::ChainCorruption {
                        backup: self.backup.clone(),
                        path: source,
                        reason: format!("'{}' is missing from parent backup '{}'", relative, self.parent),
                    });
                }
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| BackupError::local(parent, e))?;
            }
            remove_existing(&target)?;
            if let Err(e) = fs::hard_link(&source, &target) {
                debug!("Hardlink {} failed ({}), copying instead", target.display(), e);
                fs::copy(&source, &target).map_err(|e| BackupError::local(&target, e))?;
            }
        }
        debug!(
            "Linked {} files of '{}' from '{}'",
            self.paths.len(),
            self.backup,
            self.parent
        );
        Ok(self.paths.len())
    }
}
