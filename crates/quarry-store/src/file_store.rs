//! JSON-file-backed task store.

use std::fs;
use std::path::{Path, PathBuf};

use quarry_core::{StoreError, StoreResult, TaskStore, TaskTable};

/// A [`TaskStore`] that persists the task table as a single JSON document.
///
/// Every cycle reads the document fresh and every save rewrites it
/// wholesale; at the expected scale (tens to low hundreds of tasks) this is
/// fast local disk I/O. Saves go through a temp file and an atomic rename so
/// a crash mid-write never leaves a truncated document. A corrupt document
/// is preserved as a timestamped `.corrupted.*` sibling and then abandoned,
/// so damaged state never blocks new task creation.
///
/// Multiple instances pointing at the same path overwrite each other's
/// whole-table writes (last writer wins). That is an accepted limitation of
/// the single-document design, not a concurrency guarantee; keep one writer
/// per task id by convention.
pub struct JsonTaskStore {
    path: PathBuf,
}

impl JsonTaskStore {
    /// Open a store backed by the given path. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default store location under the system temp directory.
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join("quarry_tasks.json")
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned()
    }

    /// Sibling artifacts belonging to this store: the in-flight temp file
    /// and any `.corrupted.*` backups left by earlier fail-soft loads.
    fn artifacts(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.tmp_path()];
        let prefix = format!("{}.corrupted.", self.file_name());
        if let Some(parent) = self.path.parent()
            && let Ok(entries) = fs::read_dir(parent)
        {
            for entry in entries.flatten() {
                if entry.file_name().to_string_lossy().starts_with(&prefix) {
                    paths.push(entry.path());
                }
            }
        }
        paths
    }

    fn backup_corrupted(&self) {
        if let Some(parent) = self.path.parent() {
            let backup = parent.join(format!(
                "{}.corrupted.{}",
                self.file_name(),
                chrono::Utc::now().timestamp()
            ));
            let _ = fs::copy(&self.path, backup);
        }
    }
}

impl Default for JsonTaskStore {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

impl TaskStore for JsonTaskStore {
    fn load(&self) -> TaskTable {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<TaskTable>(&contents) {
                Ok(table) => {
                    tracing::debug!(path = ?self.path, tasks = table.len(), "Loaded task table");
                    table
                }
                Err(e) => {
                    tracing::warn!(
                        path = ?self.path,
                        error = %e,
                        "Failed to parse task table, starting fresh"
                    );
                    self.backup_corrupted();
                    TaskTable::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = ?self.path, "Task table not found, starting fresh");
                TaskTable::new()
            }
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Failed to read task table");
                TaskTable::new()
            }
        }
    }

    fn save(&mut self, table: &TaskTable) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(table)?;

        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, json).map_err(|e| StoreError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::io(&self.path, e))?;

        tracing::debug!(path = ?self.path, tasks = table.len(), "Persisted task table");
        Ok(())
    }

    fn size_bytes(&self) -> u64 {
        let mut total = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        for artifact in self.artifacts() {
            total += fs::metadata(&artifact).map(|m| m.len()).unwrap_or(0);
        }
        total
    }

    fn clear(&mut self) -> StoreResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&self.path, e)),
        }
        for artifact in self.artifacts() {
            let _ = fs::remove_file(artifact);
        }
        tracing::debug!(path = ?self.path, "Cleared task store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::Task;
    use serde_json::Map;

    fn store_in(dir: &tempfile::TempDir) -> JsonTaskStore {
        JsonTaskStore::new(dir.path().join("tasks.json"))
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.load().is_empty());
        assert_eq!(store.size_bytes(), 0);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);

        let mut table = TaskTable::new();
        table.insert(Task::new("scrape", Map::new(), "round trip"));
        store.save(&table).unwrap();

        assert_eq!(store.load(), table);
        assert!(store.size_bytes() > 0);
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn saving_unmodified_table_reproduces_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);

        let mut table = TaskTable::new();
        for _ in 0..5 {
            table.insert(Task::new("scrape", Map::new(), "determinism"));
        }
        store.save(&table).unwrap();
        let first = fs::read(store.path()).unwrap();

        let loaded = store.load();
        store.save(&loaded).unwrap();
        let second = fs::read(store.path()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn corrupt_file_loads_empty_and_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        fs::write(store.path(), "{ not json").unwrap();

        assert!(store.load().is_empty());

        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupted."))
            .collect();
        assert_eq!(backups.len(), 1);

        // A fresh table can still be written over the damage.
        let mut table = TaskTable::new();
        table.insert(Task::new("scrape", Map::new(), "after corruption"));
        store.save(&table).unwrap();
        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn clear_removes_file_and_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);

        fs::write(store.path(), "{ not json").unwrap();
        store.load(); // leaves a .corrupted backup behind

        let mut table = TaskTable::new();
        table.insert(Task::new("scrape", Map::new(), "to be cleared"));
        store.save(&table).unwrap();
        assert!(store.size_bytes() > 0);

        store.clear().unwrap();
        assert!(store.load().is_empty());
        assert_eq!(store.size_bytes(), 0);
    }
}
