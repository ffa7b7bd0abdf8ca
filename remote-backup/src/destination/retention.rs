//! Retention policy and backup removal.
//!
//! Pruning keeps the newest `keep` backups by catalog date. It does not look
//! at incremental chains, so it can remove a backup that a newer one still
//! requires; such removals are logged.

use super::catalog::{classify_key, Backup};
use super::BackupDestination;
use crate::storage::{list_files, RemoteFile};
use crate::Result;
use tracing::{info, warn};

/// Backups to delete so that only the newest `keep` remain.
///
/// `backups` must be sorted oldest first, as returned by the catalog.
pub fn backups_to_delete(backups: &[Backup], keep: i64) -> Vec<Backup> {
    if keep < 1 {
        return Vec::new();
    }
    let keep = usize::try_from(keep).unwrap_or(usize::MAX);
    if backups.len() <= keep {
        return Vec::new();
    }
    backups[..backups.len() - keep].to_vec()
}

impl BackupDestination {
    /// Delete every remote object that belongs to backup `name`.
    ///
    /// Returns the number of deleted objects. The first failed delete
    /// aborts the removal; objects already deleted stay deleted.
    pub async fn remove_backup(&self, name: &str) -> Result<usize> {
        let walk_prefix = if self.path().is_empty() {
            String::new()
        } else {
            format!("{}/", self.path())
        };
        let keys: Vec<String> = list_files(self.storage().as_ref(), &walk_prefix)
            .await?
            .into_iter()
            .filter(|file: &RemoteFile| {
                classify_key(self.path(), &file.name).is_some_and(|class| class.name() == name)
            })
            .map(|file| file.name)
            .collect();

        for key in &keys {
            self.storage().delete_file(key).await?;
        }
        info!("Removed backup '{}' ({} objects)", name, keys.len());
        Ok(keys.len())
    }

    /// Delete all but the newest `keep` backups. `keep < 1` disables pruning.
    ///
    /// Returns the deleted backups, oldest first.
    pub async fn remove_old_backups(&self, keep: i64) -> Result<Vec<Backup>> {
        if keep < 1 {
            return Ok(Vec::new());
        }
        let backups = self.backup_list().await?;
        let doomed = backups_to_delete(&backups, keep);
        if !doomed.is_empty() {
            warn!(
                "Pruning {} backups without checking incremental dependencies",
                doomed.len()
            );
        }
        for backup in &doomed {
            self.remove_backup(&backup.name).await?;
        }
        Ok(doomed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn seeded(names: &[&str]) -> Arc<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        for (i, name) in names.iter().enumerate() {
            storage.insert_at(
                &format!("backups/{}.tar.gz", name),
                b"x".to_vec(),
                Utc.timestamp_opt(1_000 + i as i64, 0).unwrap(),
            );
        }
        storage
    }

    #[tokio::test]
    async fn test_keep_zero_or_negative_is_noop() {
        let storage = seeded(&["a", "b", "c"]);
        let dest = BackupDestination::new(storage.clone(), "backups");

        assert!(dest.remove_old_backups(0).await.unwrap().is_empty());
        assert!(dest.remove_old_backups(-3).await.unwrap().is_empty());
        assert_eq!(storage.keys().len(), 3);
    }

    #[tokio::test]
    async fn test_keep_more_than_present() {
        let storage = seeded(&["a", "b"]);
        let dest = BackupDestination::new(storage.clone(), "backups");

        assert!(dest.remove_old_backups(2).await.unwrap().is_empty());
        assert!(dest.remove_old_backups(10).await.unwrap().is_empty());
        assert_eq!(storage.keys().len(), 2);
    }

    #[tokio::test]
    async fn test_deletes_oldest() {
        let storage = seeded(&["a", "b", "c", "d", "e"]);
        let dest = BackupDestination::new(storage.clone(), "backups");

        let deleted: Vec<String> = dest
            .remove_old_backups(2)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(deleted, vec!["a", "b", "c"]);
        assert_eq!(storage.keys(), vec!["backups/d.tar.gz", "backups/e.tar.gz"]);
    }

    #[tokio::test]
    async fn test_first_failure_aborts() {
        let storage = seeded(&["a", "b", "c", "d"]);
        storage.fail_delete("backups/b.tar.gz");
        let dest = BackupDestination::new(storage.clone(), "backups");

        let err = dest.remove_old_backups(1).await.unwrap_err();
        assert!(err.to_string().contains("backups/b.tar.gz"));
        // "a" went before the failure and is not restored; "c" was never attempted.
        assert_eq!(
            storage.keys(),
            vec!["backups/b.tar.gz", "backups/c.tar.gz", "backups/d.tar.gz"]
        );
    }

    #[tokio::test]
    async fn test_remove_backup_matches_exact_name() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("backups/bk1.tar.gz", b"1".to_vec());
        storage.insert("backups/bk1/metadata/t.sql", b"2".to_vec());
        storage.insert("backups/bk1/shadow/t/data.bin", b"3".to_vec());
        storage.insert("backups/bk10.tar.gz", b"4".to_vec());
        storage.insert("backups/bk10/shadow/x", b"5".to_vec());
        storage.insert("backups2/bk1.tar.gz", b"6".to_vec());
        let dest = BackupDestination::new(storage.clone(), "backups");

        assert_eq!(dest.remove_backup("bk1").await.unwrap(), 3);
        assert_eq!(
            storage.keys(),
            vec![
                "backups/bk10.tar.gz",
                "backups/bk10/shadow/x",
                "backups2/bk1.tar.gz"
            ]
        );
        assert_eq!(dest.remove_backup("bk1").await.unwrap(), 0);
    }

    #[test]
    fn test_backups_to_delete() {
        let backups: Vec<Backup> = (0..4)
            .map(|i| Backup {
                name: format!("bk{}", i),
                size: 1,
                date: Utc.timestamp_opt(i, 0).unwrap(),
                layout: crate::destination::BackupLayout::Directory,
            })
            .collect();

        assert!(backups_to_delete(&backups, 0).is_empty());
        assert!(backups_to_delete(&backups, 4).is_empty());
        let names: Vec<String> = backups_to_delete(&backups, 3).into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["bk0"]);
        assert_eq!(backups_to_delete(&backups, 1).len(), 3);
    }
}
