use serde::{Deserialize, Serialize};
use std::{collections::HashMap, env, path::Path};

use crate::errors::ConfigError;
use crate::logging::LoggingEnvironment;

pub const ENV_ENVIRONMENT: &str = "TOKENWIRE_ENV";
pub const ENV_MAX_SCOPE_DEPTH: &str = "TOKENWIRE_MAX_SCOPE_DEPTH";
pub const ENV_MAX_RESOLUTION_DEPTH: &str = "TOKENWIRE_MAX_RESOLUTION_DEPTH";
pub const ENV_METRICS: &str = "TOKENWIRE_METRICS";

const DEFAULT_ROOT_SCOPE_NAME: &str = "root";
const DEFAULT_MAX_SCOPE_DEPTH: usize = 10;
const DEFAULT_MAX_RESOLUTION_DEPTH: usize = 128;

/// Container-wide settings shared by a root container and all of its scopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub environment: LoggingEnvironment,
    pub root_scope_name: String,
    /// `create_scope` fails once a container sits at this depth.
    pub max_scope_depth: usize,
    /// Longest dependency chain a single resolution may walk.
    pub max_resolution_depth: usize,
    pub metrics_enabled: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            environment: LoggingEnvironment::Development,
            root_scope_name: DEFAULT_ROOT_SCOPE_NAME.to_string(),
            max_scope_depth: DEFAULT_MAX_SCOPE_DEPTH,
            max_resolution_depth: DEFAULT_MAX_RESOLUTION_DEPTH,
            metrics_enabled: true,
        }
    }
}

impl ContainerConfig {
    pub fn production() -> Self {
        Self {
            environment: LoggingEnvironment::Production,
            ..Self::default()
        }
    }

    pub fn from_toml_str(source: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(source).map_err(|e| ConfigError::TomlParse(origin.to_string(), e))?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead(display.clone(), e))?;
        Self::from_toml_str(&content, &display)
    }

    /// Starts from the file config (or defaults) and lets environment variables win.
    pub fn from_env_or_file(
        file_config: Option<Self>,
        env_map: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut config = file_config.unwrap_or_default();

        if let Some(value) = env_map.get(ENV_ENVIRONMENT) {
            config.environment = value.parse().map_err(|v| ConfigError::InvalidValue {
                field: "environment".to_string(),
                value: v,
            })?;
        }
        if let Some(value) = env_map.get(ENV_MAX_SCOPE_DEPTH) {
            config.max_scope_depth = parse_usize("max_scope_depth", value)?;
        }
        if let Some(value) = env_map.get(ENV_MAX_RESOLUTION_DEPTH) {
            config.max_resolution_depth = parse_usize("max_resolution_depth", value)?;
        }
        if let Some(value) = env_map.get(ENV_METRICS) {
            config.metrics_enabled = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => true,
                "0" | "false" | "off" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "metrics_enabled".to_string(),
                        value: value.clone(),
                    })
                }
            };
        }

        config.check()?;
        Ok(config)
    }

    /// Reads the process environment on top of an optional config file.
    pub fn from_process_env(file_config: Option<Self>) -> Result<Self, ConfigError> {
        let env_map: HashMap<String, String> = env::vars()
            .filter(|(key, _)| key.starts_with("TOKENWIRE_"))
            .collect();
        Self::from_env_or_file(file_config, &env_map)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.max_resolution_depth == 0 {
            return Err(ConfigError::OutOfRange("max_resolution_depth".to_string()));
        }
        if self.root_scope_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "root_scope_name".to_string(),
                value: self.root_scope_name.clone(),
            });
        }
        Ok(())
    }
}

fn parse_usize(field: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = ContainerConfig::default();
        assert_eq!(config.root_scope_name, "root");
        assert_eq!(config.max_scope_depth, 10);
        assert_eq!(config.max_resolution_depth, 128);
        assert!(config.metrics_enabled);
        assert!(!config.environment.is_production());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ContainerConfig::from_toml_str(
            "environment = \"production\"\nmax_scope_depth = 3\n",
            "inline",
        )
        .unwrap();
        assert!(config.environment.is_production());
        assert_eq!(config.max_scope_depth, 3);
        assert_eq!(config.max_resolution_depth, 128);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let err = ContainerConfig::from_toml_str("max_scope_depth = \"deep\"", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(origin, _) if origin == "inline"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "root_scope_name = \"app\"").unwrap();
        writeln!(file, "metrics_enabled = false").unwrap();

        let config = ContainerConfig::load(file.path()).unwrap();
        assert_eq!(config.root_scope_name, "app");
        assert!(!config.metrics_enabled);
    }

    #[test]
    fn test_missing_file() {
        let err = ContainerConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(_, _)));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = ContainerConfig {
            max_scope_depth: 4,
            ..ContainerConfig::default()
        };
        let config = ContainerConfig::from_env_or_file(
            Some(file),
            &env(&[(ENV_MAX_SCOPE_DEPTH, "7"), (ENV_ENVIRONMENT, "prod"), (ENV_METRICS, "off")]),
        )
        .unwrap();
        assert_eq!(config.max_scope_depth, 7);
        assert!(config.environment.is_production());
        assert!(!config.metrics_enabled);
    }

    #[test]
    fn test_env_invalid_values() {
        let err = ContainerConfig::from_env_or_file(None, &env(&[(ENV_ENVIRONMENT, "staging")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "environment"));

        let err =
            ContainerConfig::from_env_or_file(None, &env(&[(ENV_MAX_RESOLUTION_DEPTH, "0")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange(_)));
    }
}
