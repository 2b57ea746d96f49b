//! Document layout of a sheet as seen by existing consumers.
//!
//! Each cell is keyed by its `rowKey:colKey` address and carries `value`,
//! `computedValue`, an optional `formula`, `permission_level` and optional
//! `dependencies`. Error values travel as their token; a propagated error
//! also names its origin in `errorSource`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use planline_engine::engine::{
    Cell, CellError, CellKey, ComputedValue, FieldClass, FormulaId, RawValue, Reference, Role,
    SheetName,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedCell {
    pub value: Option<RawValue>,
    #[serde(rename = "computedValue")]
    pub computed_value: Option<ComputedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<FormulaId>,
    pub permission_level: Role,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Reference>,
    #[serde(default, skip_serializing_if = "FieldClass::is_exact")]
    pub field_class: FieldClass,
    #[serde(
        rename = "errorSource",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_source: Option<Reference>,
}

impl PersistedCell {
    pub fn from_cell(cell: &Cell) -> Self {
        let error_source = cell
            .computed_value
            .as_ref()
            .and_then(ComputedValue::as_error)
            .and_then(CellError::origin)
            .cloned();
        // The token alone is stored; the origin goes to `errorSource`.
        let computed_value = cell.computed_value.as_ref().map(|value| match value {
            ComputedValue::Error(err) => ComputedValue::Error(CellError::Raised(err.kind())),
            other => other.clone(),
        });
        PersistedCell {
            value: cell.raw_value.clone(),
            computed_value,
            formula: cell.formula_id.clone(),
            permission_level: cell.permission_level,
            dependencies: cell.dependencies.clone(),
            field_class: cell.field_class,
            error_source,
        }
    }

    /// An input cell's computed value is rebuilt from `value`, so text that
    /// reads like an error token stays text.
    pub fn into_cell(self, key: CellKey) -> Cell {
        let computed_value = if self.formula.is_none() {
            self.value.clone().map(ComputedValue::from)
        } else {
            match (self.computed_value, self.error_source) {
                (Some(ComputedValue::Error(err)), Some(origin)) => {
                    Some(ComputedValue::Error(CellError::Propagated {
                        kind: err.kind(),
                        origin,
                    }))
                }
                (computed, _) => computed,
            }
        };
        Cell {
            key,
            raw_value: self.value,
            computed_value,
            formula_id: self.formula,
            dependencies: self.dependencies,
            permission_level: self.permission_level,
            field_class: self.field_class,
        }
    }
}

/// Every cell of one sheet, in declaration order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SheetDocument {
    pub sheet: SheetName,
    pub cells: IndexMap<CellKey, PersistedCell>,
}

impl SheetDocument {
    pub fn from_cells<I>(sheet: SheetName, cells: I) -> Self
    where
        I: IntoIterator<Item = Cell>,
    {
        SheetDocument {
            sheet,
            cells: cells
                .into_iter()
                .map(|cell| (cell.key.clone(), PersistedCell::from_cell(&cell)))
                .collect(),
        }
    }

    pub fn into_cells(self) -> Vec<Cell> {
        self.cells
            .into_iter()
            .map(|(key, cell)| cell.into_cell(key))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&PersistedCell> {
        self.cells.get(key)
    }
}
