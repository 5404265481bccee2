// Backups of save/file1.rpgsave live in save/.rmse_backups/ as
// file1.rpgsave.<timestamp>.backup. The directory listing is the only record.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::{Result, SaveError};

pub const MAX_BACKUPS: usize = 5;

pub const BACKUP_DIR_NAME: &str = ".rmse_backups";
pub const BACKUP_SUFFIX: &str = ".backup";

#[derive(Clone, Debug, Serialize)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
    pub created: DateTime<Local>,
}

struct Backup {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

#[derive(Clone, Debug)]
pub struct BackupManager {
    retention: usize,
}

impl Default for BackupManager {
    fn default() -> Self {
        Self {
            retention: MAX_BACKUPS,
        }
    }
}

impl BackupManager {
    pub fn with_retention(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn backup_dir(save_path: &Path) -> PathBuf {
        save_path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(BACKUP_DIR_NAME)
    }

    /// Copies `save_path` into the backup directory and prunes old entries.
    ///
    /// Returns `None` when there is nothing to back up or the copy failed.
    /// Failures are logged and never propagate.
    pub fn create_backup(&self, save_path: &Path) -> Option<PathBuf> {
        if !save_path.exists() {
            log::info!("no backup needed, file doesn't exist: {}", save_path.display());
            return None;
        }

        match self.copy_to_backup(save_path) {
            Ok(backup) => {
                log::info!("created backup: {}", backup.display());
                self.prune(save_path);
                Some(backup)
            }
            Err(e) => {
                log::warn!("failed to create backup for {}: {e}", save_path.display());
                None
            }
        }
    }

    fn copy_to_backup(&self, save_path: &Path) -> std::io::Result<PathBuf> {
        let dir = Self::backup_dir(save_path);
        fs::create_dir_all(&dir)?;

        let base = base_name(save_path);
        let stamp = timestamp(Utc::now());
        let mut backup = dir.join(format!("{base}.{stamp}{BACKUP_SUFFIX}"));
        let mut n = 1u32;
        while backup.exists() {
            backup = dir.join(format!("{base}.{stamp}_{n:03}{BACKUP_SUFFIX}"));
            n += 1;
        }

        // Written rather than fs::copy'd so the entry's mtime is the backup time.
        fs::write(&backup, fs::read(save_path)?)?;
        Ok(backup)
    }

    /// Backups of `save_path`, newest first. Empty if there are none or the
    /// directory cannot be read.
    pub fn list_backups(&self, save_path: &Path) -> Vec<PathBuf> {
        self.collect(save_path).into_iter().map(|b| b.path).collect()
    }

    pub fn backup_at(&self, save_path: &Path, index: usize) -> Result<PathBuf> {
        self.list_backups(save_path)
            .into_iter()
            .nth(index)
            .ok_or_else(|| SaveError::NoBackupAtIndex {
                path: save_path.to_path_buf(),
                index,
            })
    }

    fn collect(&self, save_path: &Path) -> Vec<Backup> {
        let dir = Self::backup_dir(save_path);
        if !dir.is_dir() {
            return Vec::new();
        }
        let prefix = format!("{}.", base_name(save_path));

        let mut backups: Vec<Backup> = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::warn!("failed to read backup entry in {}: {e}", dir.display());
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map_or(false, |name| {
                        name.starts_with(&prefix) && name.ends_with(BACKUP_SUFFIX)
                    })
            })
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                Some(Backup {
                    modified: meta.modified().ok()?,
                    size: meta.len(),
                    path: entry.into_path(),
                })
            })
            .collect();

        // Names embed the timestamp, so they break mtime ties in creation order.
        backups.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.path.cmp(&a.path))
        });
        backups
    }

    /// Deletes everything past the newest `retention` backups, oldest first.
    /// Returns how many were removed; failures are logged and skipped.
    pub fn prune(&self, save_path: &Path) -> usize {
        let backups = self.list_backups(save_path);
        if backups.len() <= self.retention {
            return 0;
        }

        let mut removed = 0;
        for backup in backups[self.retention..].iter().rev() {
            match fs::remove_file(backup) {
                Ok(()) => {
                    log::info!("deleted old backup: {}", backup.display());
                    removed += 1;
                }
                Err(e) => log::warn!("failed to delete old backup {}: {e}", backup.display()),
            }
        }
        removed
    }

    pub fn clear_backups(&self, save_path: &Path) -> usize {
        let mut removed = 0;
        for backup in self.list_backups(save_path) {
            match fs::remove_file(&backup) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("failed to delete backup {}: {e}", backup.display()),
            }
        }

        let dir = Self::backup_dir(save_path);
        let is_empty = fs::read_dir(&dir).map_or(false, |mut entries| entries.next().is_none());
        if is_empty {
            if let Err(e) = fs::remove_dir(&dir) {
                log::debug!("left backup dir {} in place: {e}", dir.display());
            }
        }
        log::info!("cleared {removed} backups of {}", save_path.display());
        removed
    }

    /// Overwrites `save_path` with the contents of `backup_path`, backing up
    /// the current file first so the restore can be undone.
    pub fn restore(&self, backup_path: &Path, save_path: &Path) -> Result<()> {
        if !backup_path.is_file() {
            return Err(SaveError::BackupNotFound(backup_path.to_path_buf()));
        }
        // Read before the protective backup, whose pruning may delete this entry.
        let bytes = fs::read(backup_path)?;

        if save_path.exists() {
            self.create_backup(save_path);
        }

        fs::write(save_path, bytes)?;
        log::info!(
            "restored from backup: {} -> {}",
            backup_path.display(),
            save_path.display()
        );
        Ok(())
    }

    pub fn backup_info(&self, save_path: &Path) -> Vec<BackupInfo> {
        self.collect(save_path)
            .into_iter()
            .map(|b| BackupInfo {
                filename: b
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                size: b.size,
                created: DateTime::<Local>::from(b.modified),
                path: b.path,
            })
            .collect()
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// 2024-05-01T12:30:45.123456Z -> 2024-05-01T12-30-45-123456Z
fn timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
        .replace([':', '.'], "-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::{tempdir, TempDir};

    fn save_file(contents: &str) -> (TempDir, PathBuf) {
        let tmp = tempdir().unwrap();
        let save = tmp.path().join("save").join("test.rmmzsave");
        fs::create_dir_all(save.parent().unwrap()).unwrap();
        fs::write(&save, contents).unwrap();
        (tmp, save)
    }

    // Creates `count` backups with strictly increasing mtimes, oldest first.
    fn backups_with_mtimes(manager: &BackupManager, save: &Path, count: usize) -> Vec<PathBuf> {
        let mut created = Vec::new();
        for i in 0..count {
            fs::write(save, format!("version {i}")).unwrap();
            let backup = manager.create_backup(save).unwrap();
            set_file_mtime(&backup, FileTime::from_unix_time(1_700_000_000 + i as i64 * 60, 0))
                .unwrap();
            created.push(backup);
        }
        created
    }

    #[test]
    fn timestamp_has_no_path_unsafe_characters() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap();
        assert_eq!(timestamp(t), "2024-05-01T12-30-45-000000Z");
    }

    #[test]
    fn creates_backup_with_identical_bytes() {
        let (_tmp, save) = save_file("original content");
        let manager = BackupManager::default();

        let backup = manager.create_backup(&save).unwrap();
        let name = backup.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("test.rmmzsave."));
        assert!(name.ends_with(".backup"));
        assert_eq!(backup.parent().unwrap(), BackupManager::backup_dir(&save));
        assert_eq!(fs::read_to_string(&backup).unwrap(), "original content");
    }

    #[test]
    fn missing_file_gives_none_without_side_effects() {
        let tmp = tempdir().unwrap();
        let save = tmp.path().join("nonexistent.rmmzsave");

        assert_eq!(BackupManager::default().create_backup(&save), None);
        assert!(!tmp.path().join(BACKUP_DIR_NAME).exists());
    }

    #[test]
    fn copy_failure_is_swallowed() {
        let (tmp, save) = save_file("data");
        // A plain file where the backup directory should be.
        fs::write(tmp.path().join("save").join(BACKUP_DIR_NAME), "blocker").unwrap();

        assert_eq!(BackupManager::default().create_backup(&save), None);
    }

    #[test]
    fn back_to_back_backups_do_not_collide() {
        let (_tmp, save) = save_file("data");
        let manager = BackupManager::default();
        let a = manager.create_backup(&save).unwrap();
        let b = manager.create_backup(&save).unwrap();
        assert_ne!(a, b);
        assert_eq!(manager.list_backups(&save).len(), 2);
    }

    #[test]
    fn listing_without_directory_is_empty() {
        let (_tmp, save) = save_file("data");
        assert!(BackupManager::default().list_backups(&save).is_empty());
        assert!(BackupManager::default().backup_info(&save).is_empty());
    }

    #[test]
    fn listing_is_newest_first() {
        let (_tmp, save) = save_file("data");
        let manager = BackupManager::default();
        let created = backups_with_mtimes(&manager, &save, 3);

        let listed = manager.list_backups(&save);
        let expected: Vec<PathBuf> = created.into_iter().rev().collect();
        assert_eq!(listed, expected);
    }

    #[test]
    fn listing_only_matches_this_save() {
        let (_tmp, save) = save_file("data");
        let other = save.with_file_name("other.rmmzsave");
        fs::write(&other, "other").unwrap();
        let manager = BackupManager::default();

        manager.create_backup(&save).unwrap();
        manager.create_backup(&other).unwrap();
        fs::write(BackupManager::backup_dir(&save).join("notes.txt"), "x").unwrap();

        let listed = manager.list_backups(&save);
        assert_eq!(listed.len(), 1);
        assert!(listed[0].to_string_lossy().contains("test.rmmzsave"));
    }

    #[test]
    fn retention_keeps_newest_for_every_count() {
        for count in 1..=10usize {
            let (_tmp, save) = save_file("data");
            let manager = BackupManager::with_retention(5);
            let created = backups_with_mtimes(&manager, &save, count);
            // The last creation pruned before its mtime was pinned; prune
            // again now that every mtime is in place.
            manager.prune(&save);

            let listed = manager.list_backups(&save);
            assert_eq!(listed.len(), count.min(5), "count {count}");
            let expected: Vec<PathBuf> = created.iter().rev().take(5).cloned().collect();
            assert_eq!(listed, expected, "count {count}");
            for old in created.iter().take(count.saturating_sub(5)) {
                assert!(!old.exists(), "count {count}: {} survived", old.display());
            }
        }
    }

    #[test]
    fn prune_removes_oldest_by_mtime() {
        let (_tmp, save) = save_file("data");
        let manager = BackupManager::with_retention(10);
        let created = backups_with_mtimes(&manager, &save, 7);
        // Make the newest-named backup the oldest on disk.
        set_file_mtime(&created[6], FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

        let removed = BackupManager::with_retention(5).prune(&save);
        assert_eq!(removed, 2);
        assert!(!created[6].exists());
        assert!(!created[0].exists());
        assert!(created[1].exists());
    }

    #[test]
    fn prune_below_limit_is_noop() {
        let (_tmp, save) = save_file("data");
        let manager = BackupManager::default();
        backups_with_mtimes(&manager, &save, 2);
        assert_eq!(manager.prune(&save), 0);
        assert_eq!(manager.list_backups(&save).len(), 2);
    }

    #[test]
    fn restore_copies_bytes_and_protects_current() {
        let (_tmp, save) = save_file("original");
        let manager = BackupManager::default();
        let backup = manager.create_backup(&save).unwrap();
        fs::write(&save, "modified").unwrap();

        manager.restore(&backup, &save).unwrap();
        assert_eq!(fs::read_to_string(&save).unwrap(), "original");

        let listed = manager.list_backups(&save);
        assert_eq!(listed.len(), 2);
        let protective: Vec<_> = listed.iter().filter(|p| **p != backup).collect();
        assert_eq!(protective.len(), 1);
        assert_eq!(fs::read_to_string(protective[0]).unwrap(), "modified");
    }

    #[test]
    fn restore_of_oldest_survives_pruning() {
        let (_tmp, save) = save_file("data");
        let manager = BackupManager::default();
        let created = backups_with_mtimes(&manager, &save, 5);

        manager.restore(&created[0], &save).unwrap();
        assert_eq!(fs::read_to_string(&save).unwrap(), "version 0");
        assert_eq!(manager.list_backups(&save).len(), 5);
    }

    #[test]
    fn restore_to_missing_target_takes_no_backup() {
        let (tmp, save) = save_file("original");
        let manager = BackupManager::default();
        let backup = manager.create_backup(&save).unwrap();
        let target = tmp.path().join("save").join("fresh.rmmzsave");

        manager.restore(&backup, &target).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "original");
        assert!(manager.list_backups(&target).is_empty());
    }

    #[test]
    fn retention_is_at_least_one() {
        assert_eq!(BackupManager::default().retention(), MAX_BACKUPS);
        assert_eq!(BackupManager::with_retention(0).retention(), 1);
        assert_eq!(BackupManager::with_retention(8).retention(), 8);
    }

    #[test]
    fn backup_at_follows_listing_order() {
        let (_tmp, save) = save_file("data");
        let manager = BackupManager::default();
        let created = backups_with_mtimes(&manager, &save, 3);

        assert_eq!(manager.backup_at(&save, 0).unwrap(), created[2]);
        assert_eq!(manager.backup_at(&save, 2).unwrap(), created[0]);

        let err = manager.backup_at(&save, 3).unwrap_err();
        assert!(matches!(err, SaveError::NoBackupAtIndex { index: 3, .. }));
        let message = err.to_string();
        assert!(message.starts_with("no backup at index 3"), "{message}");
        assert!(!message.contains(BACKUP_DIR_NAME), "{message}");
    }

    #[test]
    fn restore_missing_backup_fails() {
        let (tmp, save) = save_file("data");
        let missing = tmp.path().join("nonexistent.backup");

        let err = BackupManager::default().restore(&missing, &save).unwrap_err();
        assert!(matches!(err, SaveError::BackupNotFound(_)));
        assert_eq!(fs::read_to_string(&save).unwrap(), "data");
    }

    #[test]
    fn info_reports_size_and_time() {
        let (_tmp, save) = save_file("twelve bytes");
        let manager = BackupManager::default();
        let backup = manager.create_backup(&save).unwrap();
        set_file_mtime(&backup, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();

        let info = manager.backup_info(&save);
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].path, backup);
        assert_eq!(info[0].size, 12);
        assert!(info[0].filename.ends_with(".backup"));
        assert_eq!(info[0].created.timestamp(), 1_700_000_000);
    }

    #[test]
    fn info_serializes_for_listing() {
        let (_tmp, save) = save_file("twelve bytes");
        let manager = BackupManager::default();
        let backup = manager.create_backup(&save).unwrap();

        let value = serde_json::to_value(manager.backup_info(&save)).unwrap();
        let entry = &value[0];
        assert_eq!(entry["size"], 12);
        assert_eq!(entry["path"].as_str().unwrap(), backup.to_str().unwrap());
        assert!(entry["filename"].as_str().unwrap().ends_with(".backup"));
        // chrono writes RFC 3339 with the local offset.
        let created = entry["created"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(created).is_ok(), "{created}");
    }

    #[test]
    fn clear_removes_all_and_directory() {
        let (_tmp, save) = save_file("data");
        let manager = BackupManager::default();
        backups_with_mtimes(&manager, &save, 3);

        assert_eq!(manager.clear_backups(&save), 3);
        assert!(manager.list_backups(&save).is_empty());
        assert!(!BackupManager::backup_dir(&save).exists());
    }

    #[test]
    fn clear_keeps_directory_shared_with_other_saves() {
        let (_tmp, save) = save_file("data");
        let other = save.with_file_name("file2.rmmzsave");
        fs::write(&other, "other").unwrap();
        let manager = BackupManager::default();
        manager.create_backup(&save).unwrap();
        manager.create_backup(&other).unwrap();

        assert_eq!(manager.clear_backups(&save), 1);
        assert_eq!(manager.list_backups(&other).len(), 1);
    }
}
