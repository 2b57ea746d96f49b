//! Changed-cells-only response of an edit.

use indexmap::IndexMap;
use serde::Serialize;

use planline_engine::engine::{CellKey, ReportedValue};

/// Cells whose reported value changed, in evaluation order.
///
/// Serializes as a JSON object: numbers as numbers, errors as their token,
/// cleared values as `null`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DiffMap(IndexMap<CellKey, ReportedValue>);

impl DiffMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: CellKey, value: ReportedValue) {
        self.0.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&ReportedValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &CellKey> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CellKey, &ReportedValue)> {
        self.0.iter()
    }

    /// Union with a later diff. A key already present keeps its position and
    /// takes the later value.
    pub fn merge(&mut self, later: DiffMap) {
        for (key, value) in later.0 {
            self.0.insert(key, value);
        }
    }

    pub fn into_inner(self) -> IndexMap<CellKey, ReportedValue> {
        self.0
    }
}

impl<'a> IntoIterator for &'a DiffMap {
    type Item = (&'a CellKey, &'a ReportedValue);
    type IntoIter = indexmap::map::Iter<'a, CellKey, ReportedValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
