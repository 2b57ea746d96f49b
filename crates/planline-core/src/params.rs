//! Global parameters shared by every sheet and user.
//!
//! Parameters are read-only while requests run. They are built once from the
//! standard defaults plus configuration overrides.

use std::collections::BTreeMap;

use planline_engine::templates::STANDARD_PARAMETERS;

/// Read-only lookup of named global parameters.
pub trait ParameterLookup: Send + Sync {
    fn get(&self, name: &str) -> Option<f64>;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GlobalParameters {
    values: BTreeMap<String, f64>,
}

impl GlobalParameters {
    /// Defaults for every parameter the standard sheets read.
    pub fn standard() -> Self {
        STANDARD_PARAMETERS
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }

    /// Replace or add parameters. Non-finite values are ignored.
    pub fn with_overrides<I>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        for (name, value) in overrides {
            if value.is_finite() {
                self.values.insert(name, value);
            } else {
                tracing::warn!(parameter = %name, "ignoring non-finite parameter value");
            }
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, f64)> for GlobalParameters {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        GlobalParameters {
            values: iter.into_iter().collect(),
        }
    }
}

impl ParameterLookup for GlobalParameters {
    fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}
