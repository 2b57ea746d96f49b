//! One user's values for one sheet.
//!
//! Cells are stored by template index; the template itself is shared. Keys
//! coming from requests or storage are validated here, so an unknown key can
//! never create a cell.

use std::sync::Arc;

use planline_engine::engine::{
    Cell, CellKey, ComputedValue, RawValue, ReportedValue, Role, SheetName, SheetTemplate, report,
};

use super::eval::Externals;
use crate::error::{CoreError, DenyReason, Result};
use crate::storage::{RawValues, SheetDocument};

pub struct SheetState {
    template: Arc<SheetTemplate>,
    raw: Vec<Option<RawValue>>,
    computed: Vec<Option<ComputedValue>>,
    /// cross-sheet values the computed values were last evaluated against
    externals: Externals,
}

impl SheetState {
    /// A state with every cell blank.
    pub fn new(template: Arc<SheetTemplate>) -> Self {
        let len = template.cells().len();
        SheetState {
            template,
            raw: vec![None; len],
            computed: vec![None; len],
            externals: Externals::new(),
        }
    }

    pub fn template(&self) -> &Arc<SheetTemplate> {
        &self.template
    }

    pub fn sheet(&self) -> SheetName {
        self.template.name()
    }

    /// Index of `key`. A malformed key names no cell either.
    pub fn index(&self, key: &str) -> Result<usize> {
        CellKey::parse(key)
            .and_then(|cell_key| self.template.index_of(&cell_key))
            .ok_or_else(|| CoreError::UnknownCell {
                sheet: self.sheet(),
                cell: key.to_string(),
            })
    }

    pub fn get(&self, key: &str) -> Result<Cell> {
        let idx = self.index(key)?;
        Ok(self.cell_at(idx))
    }

    fn cell_at(&self, idx: usize) -> Cell {
        let spec = &self.template.cells()[idx];
        Cell {
            key: spec.key.clone(),
            raw_value: self.raw[idx].clone(),
            computed_value: self.computed[idx].clone(),
            formula_id: spec.formula_id.clone(),
            dependencies: spec.dependencies.clone(),
            permission_level: spec.permission_level,
            field_class: spec.field_class,
        }
    }

    /// Check that `role` may set the raw value of `key`.
    pub fn check_edit(&self, key: &str, role: Role) -> Result<usize> {
        let idx = self.index(key)?;
        let spec = &self.template.cells()[idx];
        let reason = if !spec.is_input() {
            Some(DenyReason::FormulaCell)
        } else if !role.can_edit(spec.permission_level) {
            Some(DenyReason::InsufficientRole {
                required: spec.permission_level,
                actual: role,
            })
        } else {
            None
        };
        match reason {
            Some(reason) => Err(CoreError::PermissionDenied {
                sheet: self.sheet(),
                cell: spec.key.clone(),
                reason,
            }),
            None => Ok(idx),
        }
    }

    /// Store a raw value. An input cell's computed value is its raw value.
    /// Returns the previous raw value.
    pub fn set_raw(&mut self, key: &str, value: Option<RawValue>, role: Role) -> Result<Option<RawValue>> {
        let idx = self.check_edit(key, role)?;
        Ok(self.write_raw_at(idx, value))
    }

    pub(crate) fn write_raw_at(&mut self, idx: usize, value: Option<RawValue>) -> Option<RawValue> {
        self.computed[idx] = value.clone().map(ComputedValue::from);
        std::mem::replace(&mut self.raw[idx], value)
    }

    /// Write a computed value without permission checks.
    pub(crate) fn set_computed(&mut self, key: &CellKey, value: Option<ComputedValue>) {
        if let Some(idx) = self.template.index_of(key) {
            self.set_computed_at(idx, value);
        }
    }

    pub(crate) fn set_computed_at(&mut self, idx: usize, value: Option<ComputedValue>) {
        self.computed[idx] = value;
    }

    pub(crate) fn computed_at(&self, idx: usize) -> Option<&ComputedValue> {
        self.computed[idx].as_ref()
    }

    pub fn raw_value(&self, key: &CellKey) -> Option<&RawValue> {
        self.template
            .index_of(key)
            .and_then(|idx| self.raw[idx].as_ref())
    }

    pub fn computed_value(&self, key: &CellKey) -> Option<&ComputedValue> {
        self.template
            .index_of(key)
            .and_then(|idx| self.computed[idx].as_ref())
    }

    /// Non-blank raw values, as a store would hold them.
    pub fn raw_values(&self) -> RawValues {
        self.template
            .cells()
            .iter()
            .zip(&self.raw)
            .filter_map(|(spec, raw)| raw.as_ref().map(|r| (spec.key.to_string(), r.clone())))
            .collect()
    }

    /// Computed values in declaration order.
    pub fn computed_values(&self) -> impl Iterator<Item = (&CellKey, Option<&ComputedValue>)> {
        self.template
            .cells()
            .iter()
            .zip(&self.computed)
            .map(|(spec, value)| (&spec.key, value.as_ref()))
    }

    /// Reported (rounded) value of a cell.
    pub fn reported(&self, key: &CellKey) -> Option<ReportedValue> {
        self.template.index_of(key).map(|idx| self.reported_at(idx))
    }

    pub(crate) fn reported_at(&self, idx: usize) -> ReportedValue {
        report(self.computed[idx].as_ref(), self.template.cells()[idx].field_class)
    }

    pub fn externals(&self) -> &Externals {
        &self.externals
    }

    pub(crate) fn replace_externals(&mut self, externals: Externals) -> Externals {
        std::mem::replace(&mut self.externals, externals)
    }

    /// Install stored raw values. Unknown keys and values stored against
    /// formula cells are skipped.
    pub fn load_raw(&mut self, stored: RawValues) {
        let sheet = self.sheet();
        for (key, value) in stored {
            let Some(idx) = CellKey::parse(&key).and_then(|k| self.template.index_of(&k)) else {
                tracing::warn!(sheet = %sheet, cell = %key, "skipping stored value for unknown cell");
                continue;
            };
            if !self.template.cells()[idx].is_input() {
                tracing::warn!(sheet = %sheet, cell = %key, "ignoring stored value for formula cell");
                continue;
            }
            self.write_raw_at(idx, Some(value));
        }
    }

    /// Every cell in the persisted document layout.
    pub fn document(&self) -> SheetDocument {
        SheetDocument::from_cells(self.sheet(), (0..self.raw.len()).map(|idx| self.cell_at(idx)))
    }
}
