//! Recomputation engine API.
//!
//! - [`Cell`], [`RawValue`], [`ComputedValue`], [`CellError`] - Cell values and errors
//! - [`CellKey`], [`SheetName`], [`Reference`] - Keys and dependency references
//! - [`DependencyGraph`] - Affected sets and evaluation order
//! - [`detect_cycle`] - Circular dependency detection
//! - [`FormulaRegistry`] - Compiled Rhai formulas
//! - [`Catalog`], [`SheetTemplate`] - Validated sheet templates
//! - [`report`] - Rounding at the reporting boundary

mod cell;
mod cell_key;
mod cycle;
mod deps;
mod error;
mod eval;
mod format;
mod template;

pub use cell::{Cell, CellError, ComputedValue, ErrorKind, FieldClass, RawValue, Role};
pub use cell_key::{CellKey, Reference, SheetName};
pub use cycle::detect_cycle;
pub use deps::{AffectedSet, DependencyGraph};
pub use error::{TemplateError, format_cycle};
pub use eval::{CompiledFormula, FormulaId, FormulaRegistry, InputSource, Resolved, create_engine};
pub use format::{ReportedValue, format_number, report, round_for};
pub use template::{Catalog, CellSpec, SheetTemplate, TemplateBuilder};
