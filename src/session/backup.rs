// src/session/backup.rs

use std::{fs, io, path::PathBuf};

use crate::models::attempt::ProgressSnapshot;

/// Local, non-network copy of the latest snapshot of each attempt.
///
/// Written synchronously so it can run from a termination hook. Nothing in
/// the session reads it back; it is an artifact for operators and tooling.
#[derive(Debug, Clone)]
pub struct LocalBackup {
    dir: PathBuf,
}

impl LocalBackup {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, attempt_id: i64) -> PathBuf {
        self.dir.join(format!("simulado_backup_{}.json", attempt_id))
    }

    /// Overwrite the backup of an attempt. Goes through a temp file and a
    /// rename so a crash mid-write leaves the previous copy intact.
    pub fn write(&self, attempt_id: i64, snapshot: &ProgressSnapshot) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let target = self.path_for(attempt_id);
        let tmp = target.with_extension("json.tmp");
        let body = serde_json::to_vec(snapshot).map_err(io::Error::other)?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &target)
    }

    /// Remove the backup of an attempt. Missing files are fine.
    pub fn clear(&self, attempt_id: i64) -> io::Result<()> {
        match fs::remove_file(self.path_for(attempt_id)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Inspect a stored backup.
    pub fn read(&self, attempt_id: i64) -> io::Result<Option<ProgressSnapshot>> {
        match fs::read(self.path_for(attempt_id)) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(io::Error::other),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn snapshot() -> ProgressSnapshot {
        ProgressSnapshot {
            answers: HashMap::from([(1, "A".to_string()), (7, "D".to_string())]),
            current_index: 4,
            time_remaining_seconds: 1234,
            revision: 9,
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let backup = LocalBackup::new(dir.path().join("nested"));

        backup.write(42, &snapshot()).unwrap();

        assert!(backup.path_for(42).ends_with("simulado_backup_42.json"));
        assert_eq!(backup.read(42).unwrap(), Some(snapshot()));
        assert_eq!(backup.read(43).unwrap(), None);
    }

    #[test]
    fn test_overwrite_keeps_latest() {
        let dir = TempDir::new().unwrap();
        let backup = LocalBackup::new(dir.path());

        backup.write(1, &ProgressSnapshot::default()).unwrap();
        backup.write(1, &snapshot()).unwrap();

        assert_eq!(backup.read(1).unwrap(), Some(snapshot()));
        assert!(!backup.path_for(1).with_extension("json.tmp").exists());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let backup = LocalBackup::new(dir.path());

        backup.write(9, &snapshot()).unwrap();
        backup.clear(9).unwrap();
        backup.clear(9).unwrap();

        assert_eq!(backup.read(9).unwrap(), None);
    }

    #[test]
    fn test_backup_format_matches_snapshot_fields() {
        let dir = TempDir::new().unwrap();
        let backup = LocalBackup::new(dir.path());
        backup.write(5, &snapshot()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(backup.path_for(5)).unwrap()).unwrap();
        assert_eq!(raw["current_index"], 4);
        assert_eq!(raw["time_remaining_seconds"], 1234);
        assert_eq!(raw["answers"]["7"], "D");
    }
}
