//! Transient in-process task store.

use std::sync::{Arc, RwLock};

use quarry_core::{StoreResult, TaskStore, TaskTable};

/// A [`TaskStore`] holding the table in process memory.
///
/// Suitable for tests and for ephemeral runs where tracking across process
/// restarts is not needed. All records are lost when the process exits.
/// `size_bytes` reports the serialized footprint the table would have on
/// disk, so cache-size accounting behaves the same as with the file store.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    table: Arc<RwLock<TaskTable>>,
}

impl InMemoryTaskStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn load(&self) -> TaskTable {
        self.table
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn save(&mut self, table: &TaskTable) -> StoreResult<()> {
        *self
            .table
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = table.clone();
        Ok(())
    }

    fn size_bytes(&self) -> u64 {
        let table = self
            .table
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if table.is_empty() {
            return 0;
        }
        serde_json::to_vec(&*table).map(|b| b.len() as u64).unwrap_or(0)
    }

    fn clear(&mut self) -> StoreResult<()> {
        *self
            .table
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = TaskTable::new();
        Ok(())
    }
}
