//! Reporting boundary: rounding and wire representation.
//!
//! Values are rounded only here, when they leave the engine. Chained formulas
//! always see full precision.

use serde::{Serialize, Serializer};
use std::fmt;

use super::cell::{ComputedValue, ErrorKind, FieldClass};

const RATIO_SCALE: f64 = 1_000.0;

/// A computed value as the caller sees it.
#[derive(Clone, Debug, PartialEq)]
pub enum ReportedValue {
    Empty,
    Number(f64),
    Text(String),
    Error(ErrorKind),
}

impl ReportedValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ReportedValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ReportedValue::Error(_))
    }
}

/// Round half to even at the precision of the field class.
pub fn round_for(n: f64, class: FieldClass) -> f64 {
    let rounded = match class {
        FieldClass::Exact => n,
        FieldClass::Total => n.round_ties_even(),
        FieldClass::Ratio => (n * RATIO_SCALE).round_ties_even() / RATIO_SCALE,
    };
    // Normalise -0.0 so that a sign flip at zero is not reported as a change.
    rounded + 0.0
}

/// Reported form of a cell's computed value.
pub fn report(value: Option<&ComputedValue>, class: FieldClass) -> ReportedValue {
    match value {
        None => ReportedValue::Empty,
        Some(ComputedValue::Number(n)) => ReportedValue::Number(round_for(*n, class)),
        Some(ComputedValue::Text(s)) => ReportedValue::Text(s.clone()),
        Some(ComputedValue::Error(err)) => ReportedValue::Error(err.kind()),
    }
}

/// Format a number for display.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "#NAN!".to_string()
    } else if n.is_infinite() {
        "#INF!".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{:.0}", n)
    } else {
        let text = format!("{:.3}", n);
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

impl fmt::Display for ReportedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportedValue::Empty => Ok(()),
            ReportedValue::Number(n) => f.write_str(&format_number(*n)),
            ReportedValue::Text(s) => f.write_str(s),
            ReportedValue::Error(kind) => f.write_str(kind.token()),
        }
    }
}

impl Serialize for ReportedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ReportedValue::Empty => serializer.serialize_none(),
            ReportedValue::Number(n) => serializer.serialize_f64(*n),
            ReportedValue::Text(s) => serializer.serialize_str(s),
            ReportedValue::Error(kind) => serializer.serialize_str(kind.token()),
        }
    }
}
