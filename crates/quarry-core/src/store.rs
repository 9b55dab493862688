//! The persistence seam for task records.
//!
//! A [`TaskTable`] is the whole persisted document: every task the tracker
//! has ever created, keyed by id, plus a schema version for future
//! evolution. [`TaskStore`] implementations live in `quarry-store`; this
//! module only fixes the contract.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::StoreResult;
use crate::task::{Task, TaskId};

/// Current version of the persisted table schema.
pub const SCHEMA_VERSION: u32 = 1;

fn schema_version_default() -> u32 {
    SCHEMA_VERSION
}

/// The persisted task table: `{ "schema_version": 1, "tasks": { id: task } }`.
///
/// Pre-versioning documents deserialize with the current schema version.
/// Tasks are kept ordered by id so the serialized document is deterministic
/// and writing back an unmodified table reproduces it byte for byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTable {
    /// Schema version of this document.
    #[serde(default = "schema_version_default")]
    pub schema_version: u32,

    /// All known tasks, keyed by id.
    #[serde(default)]
    pub tasks: BTreeMap<TaskId, Task>,
}

impl TaskTable {
    /// Create an empty table at the current schema version.
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            tasks: BTreeMap::new(),
        }
    }

    /// Insert or replace a task, keyed by its own id.
    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    /// Look up a task by id.
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Look up a task by id for mutation.
    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    /// Number of tasks in the table.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the table holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Durable, process-local persistence of the task table.
///
/// The table is rewritten wholesale on each mutation; implementations must
/// make `save` atomic (write-temp-then-rename or equivalent) so a crash
/// mid-write never leaves a truncated document behind.
pub trait TaskStore: Send {
    /// Load the current table.
    ///
    /// Fail-soft: a missing or corrupt backing document yields an empty
    /// table and a log line, never an error, so a damaged state file cannot
    /// block new task creation.
    fn load(&self) -> TaskTable;

    /// Persist the full table atomically.
    fn save(&mut self, table: &TaskTable) -> StoreResult<()>;

    /// On-disk footprint of the store plus any associated temp artifacts,
    /// in bytes.
    fn size_bytes(&self) -> u64;

    /// Remove all records and associated temp artifacts.
    fn clear(&mut self) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_has_current_schema_version() {
        let table = TaskTable::new();
        assert_eq!(table.schema_version, SCHEMA_VERSION);
        assert!(table.is_empty());
    }

    #[test]
    fn unversioned_document_upgrades_on_load() {
        let table: TaskTable = serde_json::from_str(r#"{"tasks": {}}"#).unwrap();
        assert_eq!(table.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn table_round_trips_by_id() {
        let mut table = TaskTable::new();
        let task = Task::new("scrape", serde_json::Map::new(), "round trip");
        let id = task.id.clone();
        table.insert(task);

        let json = serde_json::to_string(&table).unwrap();
        let back: TaskTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
        assert_eq!(back.get(&id).unwrap().kind, "scrape");
    }
}
