//! Raw-value persistence.
//!
//! The core only persists what users typed. Computed values are derived again
//! on load, so a store never has to understand formulas.

mod json;
mod memory;
mod persisted;

pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use persisted::{PersistedCell, SheetDocument};

use std::collections::BTreeMap;
use thiserror::Error;

use planline_engine::engine::{CellKey, RawValue, SheetName};

/// Stored raw values of one user's sheet. Keys are kept as stored; they are
/// validated against the template when the sheet is loaded.
pub type RawValues = BTreeMap<String, RawValue>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed document {path}: {message}")]
    Malformed { path: String, message: String },

    #[error("invalid user id '{0}'")]
    InvalidUser(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Transient failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Unavailable(_))
    }
}

/// Per-user, per-sheet store of raw cell values. Upserts are last-write-wins.
pub trait RawValueStore: Send + Sync {
    fn load(&self, user: &str, sheet: SheetName) -> Result<RawValues, StoreError>;

    /// Store `value` for `key`; `None` clears it.
    fn save(
        &self,
        user: &str,
        sheet: SheetName,
        key: &CellKey,
        value: Option<&RawValue>,
    ) -> Result<(), StoreError>;
}
