use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Settings shared by every crate in the workspace.
///
/// Sourced from an optional `configuration.{toml,yaml,json}` file and
/// `APP__*` environment variables, in that order.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::load_from("configuration")
    }

    /// Load from an explicit file (with or without extension) plus `APP__*` overrides.
    pub fn load_from(path: &str) -> Result<Self, AppError> {
        let config = Cfg::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_from("/nonexistent/identity-configuration").unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_file_overrides_log_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configuration.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "log_format = \"pretty\"").unwrap();

        let config = Config::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.log_format, LogFormat::Pretty);
    }
}
