//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
}

/// Load configuration: file (or defaults), then environment overrides,
/// then validation.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_config(&fs::read_to_string(path)?)?,
        None => AppConfig::default(),
    };

    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Apply `APP_ENV`, `APP_BIND_ADDRESS`, `LOG_LEVEL`, `LOG_ENABLE`,
/// `LOG_NAME`, `MAX_SIZE`, `MAX_BACKUPS`, `MAX_AGE` and `COMPRESS`.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
        value.trim().parse().map_err(|_| ConfigError::Env { var, value })
    }

    if let Some(v) = lookup("APP_ENV") {
        config.env = parsed("APP_ENV", v)?;
    }
    if let Some(v) = lookup("APP_BIND_ADDRESS") {
        config.server.bind_address = v;
    }
    if let Some(v) = lookup("LOG_LEVEL") {
        config.logger.level = parsed("LOG_LEVEL", v)?;
    }
    if let Some(v) = lookup("LOG_ENABLE") {
        config.logger.file.enable = parsed("LOG_ENABLE", v)?;
    }
    if let Some(v) = lookup("LOG_NAME") {
        config.logger.file.name = v;
    }
    if let Some(v) = lookup("MAX_SIZE") {
        config.logger.file.max_size = parsed("MAX_SIZE", v)?;
    }
    if let Some(v) = lookup("MAX_BACKUPS") {
        config.logger.file.max_backups = parsed("MAX_BACKUPS", v)?;
    }
    if let Some(v) = lookup("MAX_AGE") {
        config.logger.file.max_age = parsed("MAX_AGE", v)?;
    }
    if let Some(v) = lookup("COMPRESS") {
        config.logger.file.compress = parsed("COMPRESS", v)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::observability::Level;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_apply_after_file() {
        let mut config = parse_config("[logger]\nlevel = \"error\"\n").unwrap();
        apply_env_overrides(
            &mut config,
            env(&[
                ("APP_ENV", "production"),
                ("LOG_LEVEL", "info"),
                ("LOG_ENABLE", "true"),
                ("LOG_NAME", "/tmp/app.log"),
                ("MAX_SIZE", "1"),
                ("MAX_BACKUPS", "2"),
                ("MAX_AGE", "3"),
                ("COMPRESS", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(config.env, Environment::Production);
        assert_eq!(config.logger.level, Level::Info);
        assert!(config.logger.file.enable);
        assert_eq!(config.logger.file.name, "/tmp/app.log");
        assert_eq!(config.logger.file.max_size, 1);
        assert_eq!(config.logger.file.max_backups, 2);
        assert_eq!(config.logger.file.max_age, 3);
        assert!(config.logger.file.compress);
    }

    #[test]
    fn test_bad_env_value_is_reported() {
        let mut config = AppConfig::default();
        let err = apply_env_overrides(&mut config, env(&[("MAX_BACKUPS", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "MAX_BACKUPS", .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind_address = \"127.0.0.1:0\"").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:0");
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind_address = \"nowhere\"\nrequest_timeout_secs = 0").unwrap();

        match load_config(Some(file.path())) {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_config(Some(Path::new("/nonexistent/reqtrace.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
