//! Configuration management for remote backups.
//!
//! Loads configuration from a TOML file; every field has a default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub local: LocalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Backend type ("local" or "none")
    #[serde(default = "default_remote_storage")]
    pub remote_storage: String,

    /// Backups kept on the destination after an upload (< 1 disables)
    #[serde(default)]
    pub backups_to_keep_remote: i64,

    /// Suppress transfer progress lines
    #[serde(default)]
    pub disable_progress_bar: bool,

    /// Directory holding local backups, one subdirectory per backup
    #[serde(default = "default_local_backup_dir")]
    pub local_backup_dir: PathBuf,

    /// Bounded pipe capacity in bytes (default: 4MB)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Directory acting as the object store
    #[serde(default = "default_local_root")]
    pub root: PathBuf,

    /// Key prefix inside the store
    #[serde(default)]
    pub path: String,

    /// Compression format (tar, gzip, bzip2, lz4, xz, zstd)
    #[serde(default = "default_compression_format")]
    pub compression_format: String,

    /// Compression level passed to the encoder
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

// Default values
fn default_remote_storage() -> String {
    "local".to_string()
}

fn default_local_backup_dir() -> PathBuf {
    PathBuf::from("/var/lib/clickhouse/backup")
}

fn default_buffer_size() -> usize {
    crate::transfer::DEFAULT_BUFFER_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_local_root() -> PathBuf {
    PathBuf::from("/var/backups/remote")
}

fn default_compression_format() -> String {
    "gzip".to_string()
}

fn default_compression_level() -> i32 {
    1
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            remote_storage: default_remote_storage(),
            backups_to_keep_remote: 0,
            disable_progress_bar: false,
            local_backup_dir: default_local_backup_dir(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            root: default_local_root(),
            path: String::new(),
            compression_format: default_compression_format(),
            compression_level: default_compression_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            general: GeneralConfig::default(),
            log: LogConfig::default(),
            local: LocalConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.general.remote_storage, "local");
        assert_eq!(config.general.buffer_size, 4 * 1024 * 1024);
        assert_eq!(config.general.backups_to_keep_remote, 0);
        assert_eq!(config.local.compression_format, "gzip");
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_from_file_partial() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            r#"
[general]
backups_to_keep_remote = 3

[local]
root = "/srv/backups"
path = "clickhouse"
compression_format = "zstd"
"#
        )?;

        let config = Config::from_file(file.path())?;
        assert_eq!(config.general.backups_to_keep_remote, 3);
        assert_eq!(config.general.remote_storage, "local");
        assert_eq!(config.local.root, PathBuf::from("/srv/backups"));
        assert_eq!(config.local.path, "clickhouse");
        assert_eq!(config.local.compression_format, "zstd");
        assert_eq!(config.local.compression_level, 1);
        assert_eq!(config.log.level, "info");
        Ok(())
    }

    #[test]
    fn test_from_file_rejects_bad_toml() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[general\nremote_storage = ")?;
        assert!(Config::from_file(file.path()).is_err());
        Ok(())
    }
}
