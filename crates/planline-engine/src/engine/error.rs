//! Errors raised while building sheet templates.
//!
//! These are startup errors. A template that fails to build is never served.

use thiserror::Error;

use super::cell_key::{CellKey, Reference, SheetName};
use super::eval::FormulaId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("invalid cell key '{0}'")]
    InvalidKey(String),

    #[error("invalid reference '{reference}' in cell '{cell}': {message}")]
    InvalidReference {
        cell: String,
        reference: String,
        message: String,
    },

    #[error("duplicate cell '{0}'")]
    DuplicateCell(CellKey),

    #[error("input cell '{0}' declares dependencies")]
    InputWithDependencies(CellKey),

    #[error("cell '{cell}' depends on unknown reference '{dependency}'")]
    UnknownDependency { cell: CellKey, dependency: Reference },

    #[error("cell '{0}' references its own sheet through a sheet reference")]
    SelfReference(CellKey),

    #[error("circular dependency: {}", format_cycle(.0))]
    CycleDetected(Vec<CellKey>),

    #[error("circular sheet references: {}", format_sheets(.0))]
    SheetCycle(Vec<SheetName>),

    #[error("depends on unavailable sheet '{0}'")]
    UnavailableSheet(SheetName),

    #[error("unknown formula '{0}'")]
    UnknownFormula(FormulaId),

    #[error("formula '{formula}' failed to compile: {message}")]
    Compile { formula: FormulaId, message: String },

    #[error("formula '{formula}' reads an undeclared input: {message}")]
    UndeclaredReference { formula: FormulaId, message: String },
}

pub fn format_cycle(cycle: &[CellKey]) -> String {
    cycle
        .iter()
        .map(CellKey::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_sheets(sheets: &[SheetName]) -> String {
    sheets
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}
