//! Built-in formula functions (Rust).
//!
//! Conventions:
//! - Formula inputs are always floats; integer literals are accepted where a
//!   function takes a number.
//! - Division goes through `div`, never `/`, so a zero denominator becomes a
//!   `#DIV/0!` cell instead of an infinity.

use crate::engine::ErrorKind;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Position};
use serde::Serialize;

/// Denominators smaller than this in magnitude count as zero.
pub const DIVISION_EPSILON: f64 = 1e-12;

/// A function formulas may call, as listed by `planline functions`.
#[derive(Debug, Serialize)]
pub struct Builtin {
    pub name: &'static str,
    pub description: &'static str,
}

pub const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "div",
        description: "Division that fails with #DIV/0! on a (near-)zero denominator",
    },
    Builtin {
        name: "min",
        description: "Smaller of two numbers",
    },
    Builtin {
        name: "max",
        description: "Larger of two numbers",
    },
    Builtin {
        name: "abs",
        description: "Absolute value",
    },
    Builtin {
        name: "sum",
        description: "Sum of an array of numbers",
    },
];

pub(crate) fn runtime_error(kind: ErrorKind) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(kind.token().into(), Position::NONE).into()
}

fn safe_div(numerator: f64, denominator: f64) -> Result<f64, Box<EvalAltResult>> {
    if denominator.abs() < DIVISION_EPSILON {
        return Err(runtime_error(ErrorKind::DivideByZero));
    }
    Ok(numerator / denominator)
}

fn to_float(value: &Dynamic) -> Result<f64, Box<EvalAltResult>> {
    if let Ok(n) = value.as_float() {
        return Ok(n);
    }
    if let Ok(n) = value.as_int() {
        return Ok(n as f64);
    }
    Err(runtime_error(ErrorKind::TypeMismatch))
}

/// Register the formula built-ins on an engine.
pub fn register_builtins(engine: &mut Engine) {
    engine.register_fn("div", safe_div);
    engine.register_fn("div", |n: i64, d: f64| safe_div(n as f64, d));
    engine.register_fn("div", |n: f64, d: i64| safe_div(n, d as f64));
    engine.register_fn("div", |n: i64, d: i64| safe_div(n as f64, d as f64));

    engine.register_fn("min", |a: f64, b: f64| a.min(b));
    engine.register_fn("max", |a: f64, b: f64| a.max(b));
    engine.register_fn("abs", |a: f64| a.abs());

    engine.register_fn("sum", |values: Array| -> Result<f64, Box<EvalAltResult>> {
        values.iter().try_fold(0.0, |acc, v| Ok(acc + to_float(v)?))
    });
}
