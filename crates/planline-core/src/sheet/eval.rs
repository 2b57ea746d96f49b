//! Evaluation inputs for one sheet: local cells, cross-sheet snapshot and
//! global parameters.

use std::collections::BTreeMap;

use planline_engine::engine::{
    CellKey, ComputedValue, FormulaRegistry, InputSource, Reference, Resolved, SheetName,
};

use super::state::SheetState;
use crate::params::ParameterLookup;

/// Values of other sheets read by this sheet. `None` is a blank input; a
/// missing entry is an unresolved reference.
pub type Externals = BTreeMap<(SheetName, CellKey), Option<ComputedValue>>;

/// Process-wide, read-only evaluation inputs.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub registry: &'a FormulaRegistry,
    pub params: &'a dyn ParameterLookup,
}

impl<'a> EvalContext<'a> {
    pub fn new(registry: &'a FormulaRegistry, params: &'a dyn ParameterLookup) -> Self {
        EvalContext { registry, params }
    }
}

/// Resolves a formula's declared dependencies against a sheet state.
pub(crate) struct StateInputs<'a> {
    pub(crate) state: &'a SheetState,
    pub(crate) params: &'a dyn ParameterLookup,
}

impl InputSource for StateInputs<'_> {
    fn resolve(&self, reference: &Reference) -> Resolved<'_> {
        match reference {
            Reference::Cell(key) => match self.state.template().index_of(key) {
                Some(idx) => match self.state.computed_at(idx) {
                    Some(value) => Resolved::Value(value),
                    None => Resolved::Blank,
                },
                None => Resolved::Missing,
            },
            Reference::Sheet(sheet, key) => match self.state.externals().get(&(*sheet, key.clone())) {
                Some(Some(value)) => Resolved::Value(value),
                Some(None) => Resolved::Blank,
                None => Resolved::Missing,
            },
            Reference::Param(name) => match self.params.get(name) {
                Some(n) => Resolved::Number(n),
                None => Resolved::Missing,
            },
        }
    }
}

impl SheetState {
    /// Evaluate the formula cell at `idx` without writing the result.
    pub(crate) fn evaluate_at(&self, ctx: &EvalContext<'_>, idx: usize) -> ComputedValue {
        let spec = &self.template().cells()[idx];
        let inputs = StateInputs {
            state: self,
            params: ctx.params,
        };
        match ctx.registry.evaluate_cell(spec, &inputs) {
            Ok(n) => ComputedValue::Number(n),
            Err(err) => ComputedValue::Error(err),
        }
    }

    /// Evaluate every formula cell in dependency order. Used after loading.
    pub fn recompute_all(&mut self, ctx: &EvalContext<'_>) -> Result<(), Vec<CellKey>> {
        let order = self.template().graph().full_order()?;
        for key in &order {
            let Some(idx) = self.template().index_of(key) else {
                continue;
            };
            if self.template().cells()[idx].is_input() {
                continue;
            }
            let value = self.evaluate_at(ctx, idx);
            self.set_computed_at(idx, Some(value));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::GlobalParameters;
    use planline_engine::engine::{Catalog, CellError, ErrorKind, RawValue, Role};

    #[test]
    fn test_recompute_all_salary() {
        let catalog = Catalog::standard();
        let params = GlobalParameters::standard();
        let ctx = EvalContext::new(catalog.registry(), &params);
        let template = catalog.template(SheetName::Salary).unwrap().clone();
        let mut state = SheetState::new(template);
        state
            .set_raw("base_salary", Some(RawValue::Number(320_000.0)), Role::Admin)
            .unwrap();
        state
            .set_raw("overtime_hours", Some(RawValue::Number(10.0)), Role::User)
            .unwrap();
        state.recompute_all(&ctx).unwrap();

        let hourly = state.get("hourly_rate").unwrap().computed_value;
        assert_eq!(hourly, Some(ComputedValue::Number(2000.0)));
        let overtime = state.get("overtime_pay").unwrap().computed_value;
        assert_eq!(overtime, Some(ComputedValue::Number(25_000.0)));
    }

    #[test]
    fn test_missing_external_is_ref_error() {
        let catalog = Catalog::standard();
        let params = GlobalParameters::standard();
        let ctx = EvalContext::new(catalog.registry(), &params);
        let template = catalog.template(SheetName::CostDetail).unwrap().clone();
        let mut state = SheetState::new(template);
        state.recompute_all(&ctx).unwrap();

        let personnel = state.get("personnel:amount").unwrap().computed_value;
        assert_eq!(
            personnel,
            Some(ComputedValue::Error(CellError::Raised(
                ErrorKind::MissingDependency
            )))
        );
        let fixed = state.get("fixed:total").unwrap().computed_value;
        assert_eq!(
            fixed.as_ref().and_then(ComputedValue::as_error).map(CellError::kind),
            Some(ErrorKind::MissingDependency)
        );
    }
}
