use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use planline_engine::engine::{CellKey, RawValue, SheetName};

use super::{RawValueStore, RawValues, StoreError};

/// In-process store. Used by tests and when embedding the core without disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sheets: DashMap<(String, SheetName), RawValues>,
    failing_saves: AtomicUsize,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` saves fail with a retryable error.
    pub fn fail_saves(&self, n: usize) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Seed a stored value directly, bypassing key validation.
    pub fn insert_raw(&self, user: &str, sheet: SheetName, key: &str, value: RawValue) {
        self.sheets
            .entry((user.to_string(), sheet))
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn get(&self, user: &str, sheet: SheetName, key: &str) -> Option<RawValue> {
        self.sheets
            .get(&(user.to_string(), sheet))
            .and_then(|values| values.get(key).cloned())
    }
}

impl RawValueStore for MemoryStore {
    fn load(&self, user: &str, sheet: SheetName) -> Result<RawValues, StoreError> {
        Ok(self
            .sheets
            .get(&(user.to_string(), sheet))
            .map(|values| values.clone())
            .unwrap_or_default())
    }

    fn save(
        &self,
        user: &str,
        sheet: SheetName,
        key: &CellKey,
        value: Option<&RawValue>,
    ) -> Result<(), StoreError> {
        let failing = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::Unavailable("injected save failure".to_string()));
        }

        let mut values = self.sheets.entry((user.to_string(), sheet)).or_default();
        match value {
            Some(value) => {
                values.insert(key.to_string(), value.clone());
            }
            None => {
                values.remove(key.as_str());
            }
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
