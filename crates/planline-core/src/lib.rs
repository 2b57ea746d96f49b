//! planline-core - Per-user sheet state, recalculation and persistence.

pub mod error;
pub mod params;
pub mod service;
pub mod sheet;
pub mod storage;

pub use error::{CoreError, DenyReason, Result};
pub use params::{GlobalParameters, ParameterLookup};
pub use service::Workbook;
pub use sheet::{DiffMap, EditPhase, EvalContext, Externals, SheetState};
pub use storage::{
    JsonFileStore, MemoryStore, PersistedCell, RawValueStore, RawValues, SheetDocument, StoreError,
};

pub use planline_engine::engine::{
    Catalog, Cell, CellKey, ComputedValue, ErrorKind, RawValue, ReportedValue, Role, SheetName,
};
