//! Cell data structures for business sheets.
//!
//! - [`RawValue`] - What a user typed into an input cell
//! - [`ComputedValue`] - What a cell evaluates to (number, text or error)
//! - [`CellError`] / [`ErrorKind`] - Cell-local evaluation failures
//! - [`Role`] - Permission level of a cell and role of an editor
//! - [`FieldClass`] - Reporting precision of a cell
//! - [`Cell`] - A cell instance: template metadata plus per-user values

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use super::cell_key::{CellKey, Reference};
use super::eval::FormulaId;

/// Who may edit a cell. Ordered from least to most privileged.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::System => "system",
        }
    }

    /// Whether a caller with this role may edit a cell at `level`.
    pub fn can_edit(self, level: Role) -> bool {
        self >= level
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "system" => Ok(Role::System),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Precision applied when a value leaves the engine.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldClass {
    /// Reported as entered or computed.
    #[default]
    Exact,
    /// Point-in-time totals, reported as integers.
    Total,
    /// Fractions, reported to three decimal places.
    Ratio,
}

impl FieldClass {
    pub fn is_exact(&self) -> bool {
        matches!(self, FieldClass::Exact)
    }
}

/// A value entered by a user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl RawValue {
    /// Parse form input.
    /// - Empty string or whitespace -> None (the cell is cleared)
    /// - Quoted string -> Text (without quotes)
    /// - Valid finite number -> Number
    /// - Otherwise -> Text
    pub fn from_input(input: &str) -> Option<RawValue> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }

        if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
            return Some(RawValue::Text(trimmed[1..trimmed.len() - 1].to_string()));
        }

        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Some(RawValue::Number(n)),
            _ => Some(RawValue::Text(trimmed.to_string())),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            RawValue::Number(n) => Some(*n),
            RawValue::Text(_) => None,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Number(n) => write!(f, "{}", n),
            RawValue::Text(s) => f.write_str(s),
        }
    }
}

/// Why a formula could not produce a number.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ErrorKind {
    DivideByZero,
    MissingDependency,
    TypeMismatch,
    CycleDetected,
    FormulaError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::DivideByZero,
        ErrorKind::MissingDependency,
        ErrorKind::TypeMismatch,
        ErrorKind::CycleDetected,
        ErrorKind::FormulaError,
    ];

    /// Wire token shown to users in place of a number.
    pub fn token(self) -> &'static str {
        match self {
            ErrorKind::DivideByZero => "#DIV/0!",
            ErrorKind::MissingDependency => "#REF!",
            ErrorKind::TypeMismatch => "#VALUE!",
            ErrorKind::CycleDetected => "#CYCLE!",
            ErrorKind::FormulaError => "#ERR!",
        }
    }

    pub fn from_token(token: &str) -> Option<ErrorKind> {
        ErrorKind::ALL.into_iter().find(|kind| kind.token() == token)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// An error held as a cell's computed value.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum CellError {
    /// The cell's own formula failed.
    Raised(ErrorKind),
    /// A dependency already held an error; `origin` is where it was raised.
    Propagated { kind: ErrorKind, origin: Reference },
}

impl CellError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CellError::Raised(kind) => *kind,
            CellError::Propagated { kind, .. } => *kind,
        }
    }

    pub fn token(&self) -> &'static str {
        self.kind().token()
    }

    pub fn origin(&self) -> Option<&Reference> {
        match self {
            CellError::Raised(_) => None,
            CellError::Propagated { origin, .. } => Some(origin),
        }
    }

    /// The error a consumer of `source` (which holds `self`) evaluates to.
    pub fn propagate(&self, source: &Reference) -> CellError {
        match self {
            CellError::Raised(kind) => CellError::Propagated {
                kind: *kind,
                origin: source.clone(),
            },
            propagated => propagated.clone(),
        }
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// The evaluated value of a cell.
#[derive(Clone, Debug, PartialEq)]
pub enum ComputedValue {
    Number(f64),
    /// Text entered into an input cell, carried through unchanged.
    Text(String),
    Error(CellError),
}

impl ComputedValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ComputedValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&CellError> {
        match self {
            ComputedValue::Error(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RawValue> for ComputedValue {
    fn from(raw: RawValue) -> Self {
        match raw {
            RawValue::Number(n) => ComputedValue::Number(n),
            RawValue::Text(s) => ComputedValue::Text(s),
        }
    }
}

impl From<CellError> for ComputedValue {
    fn from(err: CellError) -> Self {
        ComputedValue::Error(err)
    }
}

// Errors travel as their literal token; a text value that happens to equal a
// token reads back as that error unless the reader knows the cell is an input.
impl Serialize for ComputedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ComputedValue::Number(n) => serializer.serialize_f64(*n),
            ComputedValue::Text(s) => serializer.serialize_str(s),
            ComputedValue::Error(err) => serializer.serialize_str(err.token()),
        }
    }
}

impl<'de> Deserialize<'de> for ComputedValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawValue::deserialize(deserializer)? {
            RawValue::Number(n) => ComputedValue::Number(n),
            RawValue::Text(s) => match ErrorKind::from_token(&s) {
                Some(kind) => ComputedValue::Error(CellError::Raised(kind)),
                None => ComputedValue::Text(s),
            },
        })
    }
}

/// A cell instance: template metadata plus one user's values.
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub key: CellKey,
    pub raw_value: Option<RawValue>,
    pub computed_value: Option<ComputedValue>,
    pub formula_id: Option<FormulaId>,
    pub dependencies: Vec<Reference>,
    pub permission_level: Role,
    pub field_class: FieldClass,
}

impl Cell {
    /// Input cells hold user data; everything else is derived.
    pub fn is_input(&self) -> bool {
        self.formula_id.is_none()
    }
}
