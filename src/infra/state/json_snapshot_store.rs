// JSON snapshot persistence. Load failures are non-fatal: a file that does
// not parse is renamed aside for forensic inspection - never deleted - and
// the caller starts from empty state. Saves keep a `.backup` copy of the
// previous file; timestamped backups rotate in their own directory.

use crate::core::registry::StateSnapshot;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct JsonSnapshotStore {
    data_file: PathBuf,
    backup_dir: PathBuf,
    max_backups: usize,
}

impl JsonSnapshotStore {
    pub fn new(
        data_file: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        max_backups: usize,
    ) -> Self {
        Self {
            data_file: data_file.into(),
            backup_dir: backup_dir.into(),
            max_backups,
        }
    }

    /// Load the current snapshot. A missing file is simply `None`; a corrupt
    /// file is quarantined and also reported as `None`.
    pub fn load(&self) -> Result<Option<StateSnapshot>, StoreError> {
        if !self.data_file.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(&self.data_file)?;
        match serde_json::from_str::<StateSnapshot>(&raw) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(err) => {
                let quarantine = PathBuf::from(format!(
                    "{}.corrupt.{}",
                    self.data_file.display(),
                    Utc::now().format("%Y%m%d_%H%M%S")
                ));
                tracing::error!(
                    file = %self.data_file.display(),
                    quarantine = %quarantine.display(),
                    %err,
                    "snapshot failed to parse, quarantining"
                );
                fs::rename(&self.data_file, &quarantine)?;
                Ok(None)
            }
        }
    }

    /// Write the snapshot, keeping a `.backup` copy of whatever was there.
    pub fn save(&self, snapshot: &StateSnapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.data_file.parent() {
            fs::create_dir_all(parent)?;
        }

        if self.data_file.exists() {
            let sibling = PathBuf::from(format!("{}.backup", self.data_file.display()));
            fs::copy(&self.data_file, sibling)?;
        }

        let file = fs::File::create(&self.data_file)?;
        serde_json::to_writer_pretty(file, snapshot)?;
        tracing::debug!(file = %self.data_file.display(), "snapshot saved");
        Ok(())
    }

    /// Write a timestamped backup named after the snapshot's kind, then
    /// rotate the directory down to the configured maximum.
    pub fn write_backup(&self, snapshot: &StateSnapshot) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.backup_dir)?;

        let filename = format!(
            "warden_backup_{}_{}.json",
            snapshot.backup_info.kind,
            snapshot.backup_info.timestamp.format("%Y%m%d_%H%M%S")
        );
        let path = self.backup_dir.join(filename);

        let file = fs::File::create(&path)?;
        serde_json::to_writer_pretty(file, snapshot)?;
        tracing::info!(backup = %path.display(), "backup created");

        self.rotate_backups()?;
        Ok(path)
    }

    /// Backup files, newest first. Timestamps are embedded in the names, so
    /// a lexical sort is a chronological one.
    pub fn list_backups(&self) -> Result<Vec<PathBuf>, StoreError> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups: Vec<PathBuf> = fs::read_dir(&self.backup_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_backup_file(path))
            .collect();

        backups.sort();
        backups.reverse();
        Ok(backups)
    }

    /// Load an arbitrary backup file (admin restore path). Unlike `load`,
    /// a parse failure here is an error - restoring from a broken backup
    /// should fail loudly, not silently wipe state.
    pub fn restore(&self, path: &Path) -> Result<StateSnapshot, StoreError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn rotate_backups(&self) -> Result<(), StoreError> {
        let backups = self.list_backups()?;
        for stale in backups.iter().skip(self.max_backups) {
            fs::remove_file(stale)?;
            tracing::info!(backup = %stale.display(), "old backup removed");
        }
        Ok(())
    }
}

fn is_backup_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with("warden_backup_") && name.ends_with(".json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::UserRegistry;
    use chrono::{DateTime, Utc};
    use tempfile::tempdir;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn sample_snapshot(kind: &str) -> StateSnapshot {
        let registry = UserRegistry::new(at(0));
        registry.approve(7);
        registry.ban(8, None);
        registry.record_message(7, "alice", at(5));
        registry.capture_snapshot(vec![9], kind, at(10))
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("state.json"), dir.path().join("b"), 5);

        let snapshot = sample_snapshot("manual");
        store.save(&snapshot).unwrap();

        let loaded = store.load().unwrap().expect("snapshot present");
        assert_eq!(loaded.state.approved_users, snapshot.state.approved_users);
        assert_eq!(loaded.state.banned_users, snapshot.state.banned_users);
        assert_eq!(loaded.state.user_stats, snapshot.state.user_stats);
        assert_eq!(loaded.state.suspicious_users, vec![9]);
        assert_eq!(loaded.backup_info.version, snapshot.backup_info.version);
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("state.json"), dir.path().join("b"), 5);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_quarantined_not_deleted() {
        let dir = tempdir().unwrap();
        let data_file = dir.path().join("state.json");
        fs::write(&data_file, "{not json at all").unwrap();

        let store = JsonSnapshotStore::new(&data_file, dir.path().join("b"), 5);
        assert!(store.load().unwrap().is_none());

        // Original contents moved aside under a .corrupt name.
        assert!(!data_file.exists());
        let quarantined: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(".corrupt."))
            .collect();
        assert_eq!(quarantined.len(), 1);
        let content = fs::read_to_string(dir.path().join(&quarantined[0])).unwrap();
        assert_eq!(content, "{not json at all");
    }

    #[test]
    fn save_keeps_a_backup_of_the_previous_file() {
        let dir = tempdir().unwrap();
        let data_file = dir.path().join("state.json");
        let store = JsonSnapshotStore::new(&data_file, dir.path().join("b"), 5);

        store.save(&sample_snapshot("manual")).unwrap();
        store.save(&sample_snapshot("auto")).unwrap();

        assert!(dir.path().join("state.json.backup").exists());
    }

    #[test]
    fn backups_rotate_to_the_configured_maximum() {
        let dir = tempdir().unwrap();
        let store = JsonSnapshotStore::new(
            dir.path().join("state.json"),
            dir.path().join("backups"),
            2,
        );

        for kind in ["a", "b", "c", "d"] {
            store.write_backup(&sample_snapshot(kind)).unwrap();
        }

        let remaining = store.list_backups().unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn restore_reads_a_specific_backup() {
        let dir = tempdir().unwrap();
        let store = JsonSnapshotStore::new(
            dir.path().join("state.json"),
            dir.path().join("backups"),
            5,
        );

        let path = store.write_backup(&sample_snapshot("manual")).unwrap();
        let restored = store.restore(&path).unwrap();
        assert_eq!(restored.backup_info.kind, "manual");
        assert_eq!(restored.state.approved_users, vec![7]);

        // A broken backup is a hard error on the restore path.
        let broken = dir.path().join("backups/warden_backup_x_0.json");
        fs::write(&broken, "nope").unwrap();
        assert!(store.restore(&broken).is_err());
    }
}
