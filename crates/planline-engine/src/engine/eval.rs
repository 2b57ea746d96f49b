//! Rhai engine creation and formula evaluation.
//!
//! Formulas are developer-defined Rhai expressions, compiled once into a
//! [`FormulaRegistry`] and shared read-only by every request. A formula only
//! sees what its cell declares:
//!
//! - same-sheet dependencies as variables named after the key (`rent:amount`
//!   is bound as `rent__amount`)
//! - cross-sheet dependencies as `sheets.<sheet>["<key>"]`
//! - global parameters as `params.<name>`
//!
//! Dependency errors short-circuit before the script runs, so a formula never
//! sees an error value.

use rhai::{AST, Dynamic, Engine, EvalAltResult, Map, Scope};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::cell::{CellError, ComputedValue, ErrorKind};
use super::cell_key::{Reference, SheetName};
use super::error::TemplateError;
use super::template::CellSpec;

/// Upper bound on script operations per formula evaluation.
const MAX_FORMULA_OPERATIONS: u64 = 10_000;

/// Identifier of a registered formula, conventionally `<sheet>.<cell>`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormulaId(String);

impl FormulaId {
    pub fn new(id: impl Into<String>) -> FormulaId {
        FormulaId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FormulaId {
    fn from(id: &str) -> Self {
        FormulaId(id.to_string())
    }
}

impl fmt::Display for FormulaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a dependency resolved in the current evaluation context.
#[derive(Debug, Clone, Copy)]
pub enum Resolved<'a> {
    Value(&'a ComputedValue),
    Number(f64),
    /// Known but empty (an input nobody filled in); reads as zero.
    Blank,
    /// Not available at all.
    Missing,
}

/// Supplies dependency values to the evaluator.
pub trait InputSource {
    fn resolve(&self, reference: &Reference) -> Resolved<'_>;
}

/// A compiled formula.
pub struct CompiledFormula {
    pub id: FormulaId,
    pub source: String,
    ast: AST,
}

/// Scope bindings for one evaluation.
#[derive(Debug, Default)]
struct FormulaInputs {
    cells: Vec<(String, f64)>,
    sheets: BTreeMap<SheetName, Map>,
    params: Map,
}

impl FormulaInputs {
    fn bind(&mut self, reference: &Reference, value: f64) {
        match reference {
            Reference::Cell(key) => self.cells.push((key.scope_name(), value)),
            Reference::Sheet(sheet, key) => {
                self.sheets
                    .entry(*sheet)
                    .or_default()
                    .insert(key.as_str().into(), Dynamic::from(value));
            }
            Reference::Param(name) => {
                self.params.insert(name.as_str().into(), Dynamic::from(value));
            }
        }
    }

    fn into_scope(self) -> Scope<'static> {
        let mut scope = Scope::new();
        for (name, value) in self.cells {
            scope.push_constant(name, value);
        }
        if !self.sheets.is_empty() {
            let mut sheets = Map::new();
            for (sheet, values) in self.sheets {
                sheets.insert(sheet.as_str().into(), Dynamic::from(values));
            }
            scope.push_constant("sheets", sheets);
        }
        if !self.params.is_empty() {
            scope.push_constant("params", self.params);
        }
        scope
    }
}

/// Create the sandboxed Rhai engine used for every formula.
pub fn create_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(MAX_FORMULA_OPERATIONS);
    engine.set_max_expr_depths(64, 32);
    engine.disable_symbol("eval");
    engine.on_print(|_| {});
    engine.on_debug(|_, _, _| {});
    crate::builtins::register_builtins(&mut engine);
    engine
}

/// Every formula of every template, compiled once at startup.
pub struct FormulaRegistry {
    engine: Engine,
    formulas: HashMap<FormulaId, CompiledFormula>,
}

impl FormulaRegistry {
    pub fn new() -> Self {
        FormulaRegistry {
            engine: create_engine(),
            formulas: HashMap::new(),
        }
    }

    /// Compile and register a formula.
    pub fn register(&mut self, id: FormulaId, source: &str) -> Result<(), TemplateError> {
        let ast = self
            .engine
            .compile_expression(source)
            .map_err(|e| TemplateError::Compile {
                formula: id.clone(),
                message: e.to_string(),
            })?;
        self.formulas.insert(
            id.clone(),
            CompiledFormula {
                id,
                source: source.to_string(),
                ast,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: &FormulaId) -> Option<&CompiledFormula> {
        self.formulas.get(id)
    }

    pub fn contains(&self, id: &FormulaId) -> bool {
        self.formulas.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }

    /// Evaluate a formula cell against its dependencies' current values.
    pub fn evaluate_cell(&self, spec: &CellSpec, source: &dyn InputSource) -> Result<f64, CellError> {
        let formula = spec
            .formula_id
            .as_ref()
            .and_then(|id| self.formulas.get(id))
            .ok_or(CellError::Raised(ErrorKind::FormulaError))?;

        let mut inputs = FormulaInputs::default();
        for dep in &spec.dependencies {
            let value = match source.resolve(dep) {
                Resolved::Number(n) => n,
                Resolved::Blank => 0.0,
                Resolved::Missing => return Err(CellError::Raised(ErrorKind::MissingDependency)),
                Resolved::Value(ComputedValue::Number(n)) => *n,
                Resolved::Value(ComputedValue::Text(_)) => {
                    return Err(CellError::Raised(ErrorKind::TypeMismatch));
                }
                Resolved::Value(ComputedValue::Error(err)) => return Err(err.propagate(dep)),
            };
            inputs.bind(dep, value);
        }

        self.run(formula, inputs).map_err(CellError::Raised)
    }

    fn run(&self, formula: &CompiledFormula, inputs: FormulaInputs) -> Result<f64, ErrorKind> {
        let mut scope = inputs.into_scope();
        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &formula.ast)
            .map_err(|e| classify_error(&e))?;

        let n = if let Ok(n) = result.as_float() {
            n
        } else if let Ok(n) = result.as_int() {
            n as f64
        } else {
            return Err(ErrorKind::TypeMismatch);
        };

        if n.is_finite() {
            Ok(n)
        } else {
            Err(ErrorKind::DivideByZero)
        }
    }
}

impl Default for FormulaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a script failure onto a cell error kind.
pub(crate) fn classify_error(err: &EvalAltResult) -> ErrorKind {
    match err {
        EvalAltResult::ErrorRuntime(value, _) => value
            .clone()
            .into_string()
            .ok()
            .and_then(|token| ErrorKind::from_token(&token))
            .unwrap_or(ErrorKind::FormulaError),
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => classify_error(inner),
        EvalAltResult::ErrorVariableNotFound(..) | EvalAltResult::ErrorPropertyNotFound(..) => {
            ErrorKind::MissingDependency
        }
        EvalAltResult::ErrorMismatchDataType(..) | EvalAltResult::ErrorMismatchOutputType(..) => {
            ErrorKind::TypeMismatch
        }
        _ => ErrorKind::FormulaError,
    }
}
