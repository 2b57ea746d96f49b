//! Cell keys, sheet names and dependency references.
//!
//! A key is either a bare field name (`current_sales`) or a
//! `rowKey:colKey` address (`rent:amount`). Dependency lists may also point
//! at a cell on another sheet or at a global parameter:
//!
//! ```ignore
//! let local: Reference = "m_gross_profit".parse().unwrap();
//! let remote: Reference = "salary!total_payroll".parse().unwrap();
//! let param: Reference = "$income_tax_rate".parse().unwrap();
//! assert_eq!(remote.to_string(), "salary!total_payroll");
//! ```

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::borrow::Borrow;
use std::fmt;
use std::sync::OnceLock;

/// A validated cell key, unique within one sheet.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct CellKey(String);

impl CellKey {
    /// Parse a cell key. Returns None if the input is not a valid key.
    pub fn parse(name: &str) -> Option<CellKey> {
        if key_re().is_match(name) {
            Some(CellKey(name.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Row part of a `row:col` address, or the whole key for bare names.
    pub fn row_key(&self) -> &str {
        match self.0.split_once(':') {
            Some((row, _)) => row,
            None => &self.0,
        }
    }

    /// Column part of a `row:col` address.
    pub fn col_key(&self) -> Option<&str> {
        self.0.split_once(':').map(|(_, col)| col)
    }

    /// Name under which the key is bound in a formula scope.
    pub fn scope_name(&self) -> String {
        self.0.replace(':', "__")
    }
}

impl std::str::FromStr for CellKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid cell key: {}", s))
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CellKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Serialize for CellKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CellKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        CellKey::parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid cell key '{}'", raw)))
    }
}

/// The fixed set of business sheets.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetName {
    MqCurrent,
    MqFuture,
    Breakeven,
    Salary,
    CostDetail,
}

impl SheetName {
    pub const ALL: [SheetName; 5] = [
        SheetName::MqCurrent,
        SheetName::MqFuture,
        SheetName::Breakeven,
        SheetName::Salary,
        SheetName::CostDetail,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SheetName::MqCurrent => "mq_current",
            SheetName::MqFuture => "mq_future",
            SheetName::Breakeven => "breakeven",
            SheetName::Salary => "salary",
            SheetName::CostDetail => "cost_detail",
        }
    }
}

impl std::str::FromStr for SheetName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SheetName::ALL
            .into_iter()
            .find(|sheet| sheet.as_str() == s)
            .ok_or_else(|| format!("Unknown sheet: {}", s))
    }
}

impl fmt::Display for SheetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a cell's dependency list.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Reference {
    /// A cell on the same sheet.
    Cell(CellKey),
    /// A named cell on another sheet, written `sheet!key`.
    Sheet(SheetName, CellKey),
    /// A global parameter, written `$name`.
    Param(String),
}

impl Reference {
    pub fn local(&self) -> Option<&CellKey> {
        match self {
            Reference::Cell(key) => Some(key),
            _ => None,
        }
    }

    fn parse_ref(s: &str) -> Result<Reference, String> {
        if let Some(name) = s.strip_prefix('$') {
            if param_re().is_match(name) {
                return Ok(Reference::Param(name.to_string()));
            }
            return Err(format!("Invalid parameter reference: {}", s));
        }
        if let Some((sheet, key)) = s.split_once('!') {
            let sheet = sheet.parse::<SheetName>()?;
            let key = key.parse::<CellKey>()?;
            return Ok(Reference::Sheet(sheet, key));
        }
        s.parse::<CellKey>().map(Reference::Cell)
    }
}

impl std::str::FromStr for Reference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_ref(s)
    }
}

impl From<CellKey> for Reference {
    fn from(key: CellKey) -> Self {
        Reference::Cell(key)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Cell(key) => write!(f, "{}", key),
            Reference::Sheet(sheet, key) => write!(f, "{}!{}", sheet, key),
            Reference::Param(name) => write!(f, "${}", name),
        }
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

fn key_re() -> &'static Regex {
    static KEY_RE: OnceLock<Regex> = OnceLock::new();
    KEY_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9_]*(?::[A-Za-z0-9_]+)?$")
            .expect("cell key regex must compile")
    })
}

fn param_re() -> &'static Regex {
    static PARAM_RE: OnceLock<Regex> = OnceLock::new();
    PARAM_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("parameter name regex must compile")
    })
}
