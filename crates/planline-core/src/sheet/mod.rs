//! Per-user sheet state and the recalculation coordinator.

mod diff;
mod eval;
mod ops;
mod state;

pub use diff::DiffMap;
pub use eval::{EvalContext, Externals};
pub use ops::EditPhase;
pub use state::SheetState;
