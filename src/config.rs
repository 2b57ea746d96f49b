//! Configuration file.
//!
//! Looked up at `--config <path>` or `<config dir>/planline/config.toml`. A
//! missing default file means defaults; a missing explicit file is an error.
//!
//! ```toml
//! data_dir = "/var/lib/planline"
//! log_filter = "planline_core=debug"
//! max_save_attempts = 3
//!
//! [parameters]
//! income_tax_rate = 0.2
//! ```

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use planline_core::GlobalParameters;
use planline_core::service::DEFAULT_MAX_SAVE_ATTEMPTS;

const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub log_filter: Option<String>,
    pub max_save_attempts: Option<usize>,
    /// Global parameter overrides, on top of the standard defaults.
    pub parameters: BTreeMap<String, f64>,
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Config::from_toml(&content).with_context(|| format!("parsing config {}", path.display()))
            }
            None => match default_config_path() {
                Some(path) if path.exists() => Config::load(Some(&path)),
                _ => Ok(Config::default()),
            },
        }
    }

    pub fn from_toml(content: &str) -> Result<Config> {
        Ok(toml::from_str(content)?)
    }

    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        match ProjectDirs::from("", "", "planline") {
            Some(proj) => proj.data_dir().to_path_buf(),
            None => PathBuf::from(".planline"),
        }
    }

    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    pub fn max_save_attempts(&self) -> usize {
        self.max_save_attempts.unwrap_or(DEFAULT_MAX_SAVE_ATTEMPTS)
    }

    pub fn parameters(&self) -> GlobalParameters {
        GlobalParameters::standard().with_overrides(
            self.parameters
                .iter()
                .map(|(name, value)| (name.clone(), *value)),
        )
    }
}

fn default_config_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("", "", "planline")?;
    let mut path = proj.config_dir().to_path_buf();
    path.push("config.toml");
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use planline_core::ParameterLookup;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.log_filter(), "warn");
        assert_eq!(config.max_save_attempts(), DEFAULT_MAX_SAVE_ATTEMPTS);
        assert_eq!(config.parameters().get("overtime_multiplier"), Some(1.25));
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml(
            r#"
data_dir = "/tmp/planline-data"
log_filter = "debug"
max_save_attempts = 5

[parameters]
income_tax_rate = 0.2
"#,
        )
        .unwrap();
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/planline-data"));
        assert_eq!(config.log_filter(), "debug");
        assert_eq!(config.max_save_attempts(), 5);
        let params = config.parameters();
        assert_eq!(params.get("income_tax_rate"), Some(0.2));
        assert_eq!(params.get("social_insurance_rate"), Some(0.15));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::from_toml("datadir = \"x\"").is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
