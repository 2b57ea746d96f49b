//! One JSON document per user and sheet: `<root>/<user>/<sheet>.json`.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use planline_engine::engine::{CellKey, RawValue, SheetName};

use super::{RawValueStore, RawValues, StoreError};

const MAX_USER_LEN: usize = 128;

#[derive(Debug, Serialize, Deserialize)]
struct StoredSheet {
    sheet: SheetName,
    #[serde(default)]
    values: RawValues,
}

/// File-backed store. Writes go to a temporary file that is renamed over the
/// document, so a crash never leaves a half-written sheet behind. Saves to
/// one document are serialized; different documents are written in parallel.
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    write_locks: DashMap<(String, SheetName), Arc<Mutex<()>>>,
}

impl JsonFileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(JsonFileStore {
            root,
            write_locks: DashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, user: &str, sheet: SheetName) -> Result<PathBuf, StoreError> {
        if !is_valid_user(user) {
            return Err(StoreError::InvalidUser(user.to_string()));
        }
        Ok(self.root.join(user).join(format!("{}.json", sheet)))
    }

    fn write_lock(&self, user: &str, sheet: SheetName) -> Arc<Mutex<()>> {
        Arc::clone(
            self.write_locks
                .entry((user.to_string(), sheet))
                .or_default()
                .value(),
        )
    }

    fn read(&self, path: &Path, sheet: SheetName) -> Result<RawValues, StoreError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(RawValues::new()),
            Err(err) => return Err(err.into()),
        };
        let stored: StoredSheet =
            serde_json::from_str(&content).map_err(|e| StoreError::Malformed {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        if stored.sheet != sheet {
            return Err(StoreError::Malformed {
                path: path.display().to_string(),
                message: format!("document holds sheet '{}'", stored.sheet),
            });
        }
        Ok(stored.values)
    }

    fn write(&self, path: &Path, stored: &StoredSheet) -> Result<(), StoreError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_vec_pretty(stored).map_err(|e| StoreError::Malformed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// User ids become directory names, so only a conservative character set is
/// accepted.
fn is_valid_user(user: &str) -> bool {
    !user.is_empty()
        && user.len() <= MAX_USER_LEN
        && !user.starts_with('.')
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'))
}

impl RawValueStore for JsonFileStore {
    fn load(&self, user: &str, sheet: SheetName) -> Result<RawValues, StoreError> {
        let path = self.path_for(user, sheet)?;
        self.read(&path, sheet)
    }

    fn save(
        &self,
        user: &str,
        sheet: SheetName,
        key: &CellKey,
        value: Option<&RawValue>,
    ) -> Result<(), StoreError> {
        let path = self.path_for(user, sheet)?;
        let lock = self.write_lock(user, sheet);
        let _guard = lock.lock();
        let mut values = self.read(&path, sheet)?;
        match value {
            Some(value) => {
                values.insert(key.to_string(), value.clone());
            }
            None => {
                values.remove(key.as_str());
            }
        }
        self.write(&path, &StoredSheet { sheet, values })
    }
}
