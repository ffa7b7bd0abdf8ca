//! Backup catalog derived from a flat remote listing.
//!
//! Object stores have no notion of "a backup", so the catalog is rebuilt
//! from object keys on every call. A name counts as a backup when it has
//! both a `metadata` and a `shadow` subtree, or when a single object named
//! `<name>.<archive extension>` exists. Names left behind by interrupted
//! directory uploads carry only some markers and are skipped.

use super::BackupDestination;
use crate::archive::KNOWN_ARCHIVE_EXTENSIONS;
use crate::storage::RemoteFile;
use crate::transfer::format_bytes;
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupLayout {
    /// One compressed tar object; carries its extension
    Archive(String),
    /// `metadata/` and `shadow/` subtrees
    Directory,
}

impl fmt::Display for BackupLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupLayout::Archive(extension) => f.write_str(extension),
            BackupLayout::Directory => f.write_str("directory"),
        }
    }
}

/// A logical backup found on the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub name: String,
    /// Best-effort size in bytes
    pub size: u64,
    /// Last modification time, used for ordering
    pub date: DateTime<Utc>,
    pub layout: BackupLayout,
}

/// What a single object key says about the backup it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum KeyClass<'a> {
    Archive { name: &'a str, extension: &'static str },
    Member { name: &'a str, section: Option<&'a str> },
}

impl KeyClass<'_> {
    pub(crate) fn name(&self) -> &str {
        match self {
            KeyClass::Archive { name, .. } | KeyClass::Member { name, .. } => name,
        }
    }
}

/// Classify `key` relative to the destination path `prefix`.
///
/// Returns `None` for keys outside the prefix.
pub(crate) fn classify_key<'a>(prefix: &str, key: &'a str) -> Option<KeyClass<'a>> {
    let prefix = prefix.trim_matches('/');
    let rest = if prefix.is_empty() {
        key
    } else {
        key.strip_prefix(prefix)?.strip_prefix('/')?
    };
    let rest = rest.trim_start_matches('/');

    let mut parts = rest.split('/');
    let first = parts.next().filter(|p| !p.is_empty())?;
    let second = parts.next();

    if second.is_none() {
        for extension in KNOWN_ARCHIVE_EXTENSIONS {
            if let Some(name) = first
                .strip_suffix(extension)
                .and_then(|stem| stem.strip_suffix('.'))
                .filter(|stem| !stem.is_empty())
            {
                return Some(KeyClass::Archive { name, extension });
            }
        }
    }

    Some(KeyClass::Member {
        name: first,
        section: second,
    })
}

#[derive(Debug, Default)]
struct CatalogEntry {
    has_metadata: bool,
    has_shadow: bool,
    archive: Option<(u64, DateTime<Utc>, &'static str)>,
    tree_size: u64,
    tree_date: Option<DateTime<Utc>>,
}

impl CatalogEntry {
    fn is_valid(&self) -> bool {
        (self.has_metadata && self.has_shadow) || self.archive.is_some()
    }
}

/// Accumulates listing results into catalog entries, in first-seen order.
pub struct CatalogBuilder {
    prefix: String,
    order: Vec<String>,
    entries: HashMap<String, CatalogEntry>,
}

impl CatalogBuilder {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }

    pub fn add(&mut self, file: &RemoteFile) {
        let Some(class) = classify_key(&self.prefix, &file.name) else {
            return;
        };
        let name = class.name().to_string();
        if !self.entries.contains_key(&name) {
            self.order.push(name.clone());
        }
        let entry = self.entries.entry(name).or_default();

        match class {
            KeyClass::Archive { extension, .. } => {
                entry.archive = Some((file.size, file.last_modified, extension));
            }
            KeyClass::Member { section, .. } => {
                entry.has_metadata |= section == Some("metadata");
                entry.has_shadow |= section == Some("shadow");
                entry.tree_size += file.size;
                entry.tree_date = Some(match entry.tree_date {
                    Some(date) => date.max(file.last_modified),
                    None => file.last_modified,
                });
            }
        }
    }

    /// Valid backups, oldest first. Equal dates keep first-seen order.
    pub fn finish(mut self) -> Vec<Backup> {
        let mut backups: Vec<Backup> = self
            .order
            .iter()
            .filter_map(|name| {
                let entry = self.entries.remove(name)?;
                if !entry.is_valid() {
                    debug!("Skipping incomplete backup '{}'", name);
                    return None;
                }
                let backup = match entry.archive {
                    Some((size, date, extension)) => Backup {
                        name: name.clone(),
                        size,
                        date,
                        layout: BackupLayout::Archive(extension.to_string()),
                    },
                    None => Backup {
                        name: name.clone(),
                        size: entry.tree_size,
                        date: entry.tree_date.unwrap_or_default(),
                        layout: BackupLayout::Directory,
                    },
                };
                Some(backup)
            })
            .collect();
        backups.sort_by(|a, b| a.date.cmp(&b.date));
        backups
    }
}

/// Build a catalog from a complete listing.
pub fn build_catalog<'a>(prefix: &str, files: impl IntoIterator<Item = &'a RemoteFile>) -> Vec<Backup> {
    let mut builder = CatalogBuilder::new(prefix);
    for file in files {
        builder.add(file);
    }
    builder.finish()
}

impl BackupDestination {
    /// List the backups on this destination, oldest first.
    ///
    /// A listing that fails partway through yields an error, never a
    /// partial catalog.
    pub async fn backup_list(&self) -> Result<Vec<Backup>> {
        let walk_prefix = if self.path().is_empty() {
            String::new()
        } else {
            format!("{}/", self.path())
        };

        let mut builder = CatalogBuilder::new(self.path());
        self.storage()
            .walk(&walk_prefix, &mut |file: RemoteFile| builder.add(&file))
            .await?;
        let backups = builder.finish();
        debug!("Found {} backups on {} storage", backups.len(), self.kind());
        Ok(backups)
    }
}

/// How `render_backups` prints a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFormat {
    All,
    Latest,
    Penultimate,
}

impl FromStr for ListFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "all" | "" => Ok(ListFormat::All),
            "latest" | "last" | "l" => Ok(ListFormat::Latest),
            "penult" | "prev" | "previous" | "p" => Ok(ListFormat::Penultimate),
            other => anyhow::bail!("'{}' undefined", other),
        }
    }
}

/// Print a catalog. `Latest` and `Penultimate` print a single name.
pub fn render_backups<W: Write>(
    backups: &[Backup],
    format: ListFormat,
    out: &mut W,
) -> anyhow::Result<()> {
    match format {
        ListFormat::Latest => {
            let Some(latest) = backups.last() else {
                anyhow::bail!("no backups found");
            };
            writeln!(out, "{}", latest.name)?;
        }
        ListFormat::Penultimate => {
            if backups.len() < 2 {
                anyhow::bail!("no penult backup is found");
            }
            writeln!(out, "{}", backups[backups.len() - 2].name)?;
        }
        ListFormat::All => {
            for backup in backups {
                writeln!(
                    out,
                    "{}\t{}\t{}\tremote\t{}",
                    backup.name,
                    format_bytes(backup.size),
                    backup.date.format("%d/%m/%Y %H:%M:%S"),
                    backup.layout,
                )?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn file(name: &str, size: u64, secs: i64) -> RemoteFile {
        RemoteFile {
            name: name.to_string(),
            size,
            last_modified: at(secs),
        }
    }

    #[test]
    fn test_mixed_layouts() {
        let files = vec![
            file("bk1.tar", 100, 10),
            file("bk2/metadata/x", 1, 20),
            file("bk2/shadow/y", 2, 21),
            file("bk3/metadata/x", 3, 30),
        ];
        let catalog = build_catalog("", &files);

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].name, "bk1");
        assert_eq!(catalog[0].layout, BackupLayout::Archive("tar".to_string()));
        assert_eq!(catalog[0].size, 100);
        assert_eq!(catalog[1].name, "bk2");
        assert_eq!(catalog[1].layout, BackupLayout::Directory);
        assert_eq!(catalog[1].size, 3);
        assert_eq!(catalog[1].date, at(21));
    }

    #[test]
    fn test_metadata_only_is_not_a_backup() {
        let files = vec![file("bk/metadata/a", 1, 1), file("bk/metadata/b", 1, 2)];
        assert!(build_catalog("", &files).is_empty());

        let files = vec![file("bk/shadow/a", 1, 1), file("bk/other/b", 1, 2)];
        assert!(build_catalog("", &files).is_empty());
    }

    #[test]
    fn test_prefix_and_extensions() {
        let files = vec![
            file("backups/a.tar.gz", 1, 5),
            file("backups/b.tar.zstd", 1, 4),
            file("backups/c.tar.sz", 1, 3),
            file("backups/d.zip", 1, 2),
            file("backups2/e.tar", 1, 1),
            file("elsewhere/f.tar", 1, 1),
        ];
        let names: Vec<String> = build_catalog("backups", &files)
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_stable_order_on_equal_dates() {
        let files = vec![
            file("zeta.tar", 1, 7),
            file("alpha.tar", 1, 7),
            file("mid.tar", 1, 3),
        ];
        let names: Vec<String> = build_catalog("", &files).into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["mid", "zeta", "alpha"]);
    }

    #[test]
    fn test_classify_key() {
        assert_eq!(
            classify_key("p", "p/bk1.tar.xz"),
            Some(KeyClass::Archive {
                name: "bk1",
                extension: "tar.xz"
            })
        );
        assert_eq!(
            classify_key("p", "p/bk10/shadow/x"),
            Some(KeyClass::Member {
                name: "bk10",
                section: Some("shadow")
            })
        );
        assert_eq!(classify_key("p", "pp/bk1.tar"), None);
        assert_eq!(classify_key("", ".tar").map(|c| c.name().to_string()), Some(".tar".to_string()));
    }

    #[tokio::test]
    async fn test_backup_list_from_storage() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert_at("backups/old.tar.gz", b"12".to_vec(), at(100));
        storage.insert_at("backups/new.tar.gz", b"1234".to_vec(), at(200));
        storage.insert_at("other.tar.gz", b"x".to_vec(), at(50));
        let dest = BackupDestination::new(storage, "backups");

        let catalog = dest.backup_list().await.unwrap();
        let names: Vec<&str> = catalog.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["old", "new"]);
        assert_eq!(catalog[1].size, 4);
    }

    #[tokio::test]
    async fn test_failed_walk_yields_no_catalog() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("a.tar", b"1".to_vec());
        storage.insert("b.tar", b"2".to_vec());
        storage.fail_walk_after(1);
        let dest = BackupDestination::new(storage, "");

        assert!(dest.backup_list().await.is_err());
    }

    #[test]
    fn test_render_formats() {
        let backups = build_catalog("", &[file("bk1.tar", 2048, 0), file("bk2.tar.gz", 10, 86_400)]);

        let mut out = Vec::new();
        render_backups(&backups, "latest".parse().unwrap(), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "bk2\n");

        let mut out = Vec::new();
        render_backups(&backups, ListFormat::Penultimate, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "bk1\n");

        let mut out = Vec::new();
        render_backups(&backups, ListFormat::All, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "bk1\t2.00 KB\t01/01/1970 00:00:00\tremote\ttar\n\
             bk2\t10.00 B\t02/01/1970 00:00:00\tremote\ttar.gz\n"
        );

        let err = render_backups(&backups[..1], ListFormat::Penultimate, &mut Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "no penult backup is found");
        let err = render_backups(&[], ListFormat::Latest, &mut Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "no backups found");
        assert!("sideways".parse::<ListFormat>().is_err());
    }
}
