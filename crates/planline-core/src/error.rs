//! Error types for Planline core.

use std::fmt;
use thiserror::Error;

use planline_engine::engine::{CellKey, Role, SheetName, TemplateError, format_cycle};

use crate::storage::StoreError;

/// Why an edit was refused.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DenyReason {
    /// Formula cells are never raw-settable, whatever the role.
    FormulaCell,
    InsufficientRole { required: Role, actual: Role },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::FormulaCell => f.write_str("cell is computed by a formula"),
            DenyReason::InsufficientRole { required, actual } => {
                write!(f, "requires role '{}', got '{}'", required, actual)
            }
        }
    }
}

/// Request-level errors. None of them leaves a partial mutation behind.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unknown cell '{cell}' in sheet '{sheet}'")]
    UnknownCell { sheet: SheetName, cell: String },

    #[error("permission denied for '{sheet}!{cell}': {reason}")]
    PermissionDenied {
        sheet: SheetName,
        cell: CellKey,
        reason: DenyReason,
    },

    #[error("sheet '{sheet}' is unavailable: {reason}")]
    SheetUnavailable {
        sheet: SheetName,
        reason: TemplateError,
    },

    #[error("circular dependency in sheet '{sheet}': {}", format_cycle(.cycle))]
    CycleDetected { sheet: SheetName, cycle: Vec<CellKey> },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl CoreError {
    /// True for failures a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Store(err) => err.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
