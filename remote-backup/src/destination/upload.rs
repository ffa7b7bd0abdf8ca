//! Streaming archive upload.
//!
//! A blocking producer walks the local backup and writes a tar stream into
//! a bounded pipe; the consumer compresses the pipe's output and hands it
//! to the backend as the object body. Memory use is bounded by the pipe
//! capacity, whatever the archive size.

use super::BackupDestination;
use crate::archive::{MetaFile, META_FILE_NAME};
use crate::fs::{calculate_total_size, same_file, walk_directory_with_callback};
use crate::storage::BoxReader;
use crate::transfer::{pipe, PipeWriter, ProgressCallback, ProgressReader, ProgressReporter};
use crate::{BackupError, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a successful upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Remote key the archive was stored under
    pub key: String,
    /// Files whose bytes went into the archive
    pub files_archived: usize,
    /// Uncompressed bytes archived
    pub bytes_archived: u64,
    /// Relative paths recorded as hardlinks to the parent backup
    pub hardlinks: Vec<String>,
    /// Size of the local tree, as estimated before the upload
    pub estimated_bytes: u64,
    /// Uncompressed tar stream bytes, headers included
    pub stream_bytes: u64,
    /// Bytes sent to the backend
    pub compressed_bytes: u64,
}

#[derive(Debug, Default)]
struct ArchiveStats {
    files: usize,
    bytes: u64,
    hardlinks: Vec<String>,
}

impl BackupDestination {
    /// Archive `local_root` and store it as backup `backup_name`.
    ///
    /// With `diff_from` set, files that are the same physical file under
    /// `diff_from` are recorded in the archive's [`MetaFile`] instead of
    /// being archived, and the parent is named after `diff_from`'s last
    /// path component.
    pub async fn compressed_stream_upload(
        &self,
        local_root: &Path,
        backup_name: &str,
        diff_from: Option<&Path>,
    ) -> Result<UploadSummary> {
        self.upload_archive(local_root, backup_name, diff_from)
            .await
            .map_err(|e| BackupError::upload(backup_name, e))
    }

    async fn upload_archive(
        &self,
        local_root: &Path,
        backup_name: &str,
        diff_from: Option<&Path>,
    ) -> Result<UploadSummary> {
        let key = self.archive_key(backup_name);
        match self.storage().stat_file(&key).await {
            Ok(_) => return Err(BackupError::AlreadyExists { key }),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let required_backup = match diff_from {
            Some(base) => Some(parent_backup_name(base).await?),
            None => None,
        };
        if required_backup.as_deref() == Some(backup_name) {
            return Err(BackupError::InvalidMetaFile(format!(
                "backup '{}' cannot be an increment of itself",
                backup_name
            )));
        }

        let root = local_root.to_path_buf();
        let estimated_bytes = tokio::task::spawn_blocking(move || calculate_total_size(&root))
            .await
            .map_err(|e| BackupError::local(local_root, io::Error::other(e.to_string())))?
            .map_err(|e| BackupError::local(local_root, e))?;

        info!(
            "Uploading {} to {} ({} storage)",
            local_root.display(),
            key,
            self.kind()
        );
        let progress = ProgressReporter::new(
            format!("upload {}", backup_name),
            estimated_bytes,
            self.show_progress,
        );

        let (writer, reader) = pipe(self.buffer_size);
        let job = ArchiveJob {
            root: local_root.to_path_buf(),
            diff_from: diff_from.map(Path::to_path_buf),
            required_backup,
            key: key.clone(),
        };
        let producer = tokio::task::spawn_blocking(move || job.run(writer));

        // Progress follows the tar stream so it is comparable to the estimate.
        let reporter = progress.clone();
        let callback: ProgressCallback = Arc::new(move |n| reporter.report(n));
        let counted = ProgressReader::new(reader, callback);
        let compressed = self
            .compression
            .encoder(Box::pin(counted), self.compression_level);

        let sent = Arc::new(AtomicU64::new(0));
        let sent_sink = Arc::clone(&sent);
        let sent_callback: ProgressCallback = Arc::new(move |n| sent_sink.store(n, Ordering::Relaxed));
        let body: BoxReader = Box::pin(ProgressReader::new(compressed, sent_callback));
        let stored = self.storage().put_file(&key, body).await;

        let produced = producer
            .await
            .map_err(|e| BackupError::transport(&key, io::Error::other(e.to_string())))?;

        let stats = match (stored, produced) {
            (Ok(()), Ok(stats)) => stats,
            (Ok(()), Err(e)) => {
                warn!("Archive producer failed after '{}' was stored, removing it", key);
                if let Err(delete_err) = self.storage().delete_file(&key).await {
                    warn!("Could not remove incomplete '{}': {}", key, delete_err);
                }
                return Err(e);
            }
            (Err(put_err), Err(e)) if !is_broken_pipe(&e) => {
                debug!("Backend error after producer failure: {}", put_err);
                return Err(e);
            }
            (Err(put_err), _) => return Err(put_err),
        };

        progress.finish();
        info!(
            "Uploaded '{}': {} files, {} hardlinks",
            backup_name,
            stats.files,
            stats.hardlinks.len()
        );
        Ok(UploadSummary {
            key,
            files_archived: stats.files,
            bytes_archived: stats.bytes,
            hardlinks: stats.hardlinks,
            estimated_bytes,
            stream_bytes: progress.transferred_bytes(),
            compressed_bytes: sent.load(Ordering::Relaxed),
        })
    }
}

async fn parent_backup_name(base: &Path) -> Result<String> {
    let metadata = tokio::fs::metadata(base)
        .await
        .map_err(|e| BackupError::local(base, e))?;
    if !metadata.is_dir() {
        return Err(BackupError::local(
            base,
            io::Error::new(io::ErrorKind::InvalidInput, "diff-from backup is not a directory"),
        ));
    }
    base.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            BackupError::local(
                base,
                io::Error::new(io::ErrorKind::InvalidInput, "diff-from path has no backup name"),
            )
        })
}

fn is_broken_pipe(err: &BackupError) -> bool {
    matches!(err, BackupError::Transport { source, .. } if source.kind() == io::ErrorKind::BrokenPipe)
}

/// Producer side of an upload. Runs on a blocking thread.
struct ArchiveJob {
    root: PathBuf,
    diff_from: Option<PathBuf>,
    required_backup: Option<String>,
    key: String,
}

impl ArchiveJob {
    fn run(self, writer: PipeWriter) -> Result<ArchiveStats> {
        let abort = writer.abort_handle();
        let result = self.write_archive(writer);
        if let Err(e) = &result {
            // The consumer must see a failure, not a clean end of stream.
            abort.fail(io::Error::other(e.to_string()));
        }
        result
    }

    /// Map an I/O error from the tar builder: a broken pipe means the
    /// consumer went away, anything else is a local read failure.
    fn io_error(&self, path: &Path, err: io::Error) -> BackupError {
        if err.kind() == io::ErrorKind::BrokenPipe {
            BackupError::transport(&self.key, err)
        } else {
            BackupError::local(path, err)
        }
    }

    fn write_archive(&self, writer: PipeWriter) -> Result<ArchiveStats> {
        let mut builder = tar::Builder::new(writer);
        let mut stats = ArchiveStats::default();
        let mut failure: Option<BackupError> = None;

        let walked = walk_directory_with_callback(&self.root, |file| {
            match self.archive_file(&mut builder, file, &mut stats) {
                Ok(()) => Ok(()),
                Err(e) => {
                    let message = e.to_string();
                    failure = Some(e);
                    Err(io::Error::other(message))
                }
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        walked.map_err(|e| self.io_error(&self.root, e))?;

        if !stats.hardlinks.is_empty() {
            let meta = MetaFile::new(
                self.required_backup.clone().unwrap_or_default(),
                stats.hardlinks.clone(),
            );
            meta.validate()?;
            let data = meta.to_json()?;

            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
            header.set_entry_type(tar::EntryType::Regular);
            builder
                .append_data(&mut header, META_FILE_NAME, data.as_slice())
                .map_err(|e| self.io_error(Path::new(META_FILE_NAME), e))?;
            debug!("Wrote {} with {} hardlinks", META_FILE_NAME, stats.hardlinks.len());
        }

        let writer = builder
            .into_inner()
            .map_err(|e| self.io_error(&self.root, e))?;
        writer
            .finish()
            .map_err(|e| BackupError::transport(&self.key, e))?;
        Ok(stats)
    }

    fn archive_file(
        &self,
        builder: &mut tar::Builder<PipeWriter>,
        file: &crate::fs::FileInfo,
        stats: &mut ArchiveStats,
    ) -> Result<()> {
        let name = file.archive_name();
        if name == META_FILE_NAME {
            return Err(BackupError::InvalidEntry {
                entry: name,
                reason: "name is reserved for the chain record".to_string(),
            });
        }

        let metadata =
            std::fs::metadata(&file.path).map_err(|e| BackupError::local(&file.path, e))?;
        if let Some(base) = &self.diff_from {
            let candidate = base.join(&file.relative_path);
            if same_file(&metadata, &candidate).map_err(|e| BackupError::local(&candidate, e))? {
                debug!("{} is unchanged, recording hardlink", name);
                stats.hardlinks.push(name);
                return Ok(());
            }
        }

        let mut source =
            std::fs::File::open(&file.path).map_err(|e| BackupError::local(&file.path, e))?;
        builder
            .append_file(&name, &mut source)
            .map_err(|e| self.io_error(&file.path, e))?;
        stats.files += 1;
        stats.bytes += metadata.len();
        Ok(())
    }
}
