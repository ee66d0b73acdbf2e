//! Service configuration from environment variables.
//!
//! [`ServingConfig::from_env`] first loads a `.env` file from the working
//! directory (or a parent) through `dotenvy`. Variables already set in the
//! process take precedence over the file.
//!
//! | Variable                | Default                        |
//! |-------------------------|--------------------------------|
//! | `MODEL_NAME`            | `investwise_predictor`         |
//! | `RATE_LIMIT_REQUESTS`   | `100`                          |
//! | `RATE_LIMIT_WINDOW`     | `60` (seconds)                 |
//! | `REGISTRY_TIMEOUT_MS`   | `5000`                         |
//! | `INFERENCE_TIMEOUT_MS`  | `30000`                        |
//! | `MODEL_PATHS`           | comma-separated path templates |
//! | `ALLOW_SYNTHETIC_MODEL` | `true`                         |
//! | `REDIS_URL`             | unset (in-memory windows)      |
//! | `MODEL_REGISTRY_DIR`    | unset                          |
//! | `MODEL_REGISTRY_URL`    | unset                          |
//! | `EXPLAIN_MAX_DISPLAY`   | `10`                           |
//! | `LOG_FORMAT`            | `compact`                      |

use crate::application::gateway::GatewayConfig;
use crate::application::model_manager::{ModelManagerConfig, DEFAULT_LOCAL_PATHS};
use crate::domain::window::{PolicyError, WindowPolicy};
use crate::infrastructure::telemetry::LogFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("cannot read env file {path}: {reason}")]
    EnvFile { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    pub model_name: String,
    pub rate_limit_requests: u64,
    pub rate_limit_window_secs: u64,
    pub registry_timeout_ms: u64,
    pub inference_timeout_ms: u64,
    pub model_paths: Vec<String>,
    pub allow_synthetic_model: bool,
    pub redis_url: Option<String>,
    pub model_registry_dir: Option<PathBuf>,
    pub model_registry_url: Option<String>,
    pub explain_max_display: usize,
    pub log_format: LogFormat,
}

impl Default for ServingConfig {
    fn default() -> Self {
        let manager = ModelManagerConfig::default();
        Self {
            model_name: manager.model_name,
            rate_limit_requests: 100,
            rate_limit_window_secs: 60,
            registry_timeout_ms: 5_000,
            inference_timeout_ms: 30_000,
            model_paths: DEFAULT_LOCAL_PATHS.iter().map(|p| p.to_string()).collect(),
            allow_synthetic_model: manager.allow_synthetic,
            redis_url: None,
            model_registry_dir: None,
            model_registry_url: None,
            explain_max_display: 10,
            log_format: LogFormat::default(),
        }
    }
}

impl ServingConfig {
    /// Read the process environment, after loading `.env` if one exists.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first unparsable variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the dotenv file at `path` without touching the process
    /// environment. Process variables still win over the file.
    ///
    /// # Errors
    /// Returns `ConfigError::EnvFile` if the file is missing or malformed.
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let unreadable = |e: dotenvy::Error| ConfigError::EnvFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        let file: HashMap<String, String> = dotenvy::from_path_iter(path)
            .map_err(unreadable)?
            .collect::<Result<_, _>>()
            .map_err(unreadable)?;
        tracing::debug!(path = %path.display(), variables = file.len(), "env file read");
        Self::from_lookup(|var| std::env::var(var).ok().or_else(|| file.get(var).cloned()))
    }

    /// Build from an arbitrary variable lookup. Unset or empty variables
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(name) = get("MODEL_NAME") {
            config.model_name = name;
        }
        parse_into(&get, "RATE_LIMIT_REQUESTS", &mut config.rate_limit_requests)?;
        parse_into(&get, "RATE_LIMIT_WINDOW", &mut config.rate_limit_window_secs)?;
        parse_into(&get, "REGISTRY_TIMEOUT_MS", &mut config.registry_timeout_ms)?;
        parse_into(&get, "INFERENCE_TIMEOUT_MS", &mut config.inference_timeout_ms)?;
        parse_into(&get, "EXPLAIN_MAX_DISPLAY", &mut config.explain_max_display)?;
        if let Some(value) = get("ALLOW_SYNTHETIC_MODEL") {
            config.allow_synthetic_model = parse_bool("ALLOW_SYNTHETIC_MODEL", &value)?;
        }
        if let Some(paths) = get("MODEL_PATHS") {
            config.model_paths = paths
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(value) = get("LOG_FORMAT") {
            config.log_format = value.parse().map_err(|e| ConfigError::Invalid {
                var: "LOG_FORMAT",
                value,
                reason: format!("{e}"),
            })?;
        }
        config.redis_url = get("REDIS_URL");
        config.model_registry_dir = get("MODEL_REGISTRY_DIR").map(PathBuf::from);
        config.model_registry_url = get("MODEL_REGISTRY_URL");

        config.window_policy()?;
        Ok(config)
    }

    pub fn window_policy(&self) -> Result<WindowPolicy, ConfigError> {
        Ok(WindowPolicy::per_seconds(
            self.rate_limit_requests,
            self.rate_limit_window_secs,
        )?)
    }

    pub fn gateway_config(&self) -> Result<GatewayConfig, ConfigError> {
        Ok(GatewayConfig {
            rate_limit: self.window_policy()?,
            inference_timeout: Duration::from_millis(self.inference_timeout_ms),
            explain_max_display: self.explain_max_display,
        })
    }

    pub fn model_manager_config(&self) -> ModelManagerConfig {
        ModelManagerConfig {
            model_name: self.model_name.clone(),
            registry_timeout: Duration::from_millis(self.registry_timeout_ms),
            local_paths: self.model_paths.clone(),
            allow_synthetic: self.allow_synthetic_model,
            ..ModelManagerConfig::default()
        }
    }
}

fn parse_into<T, G>(get: &G, var: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(value) = get(var) {
        *slot = value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        })?;
    }
    Ok(())
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServingConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServingConfig::default());
        let gateway = config.gateway_config().unwrap();
        assert_eq!(gateway.rate_limit.limit(), 100);
        assert_eq!(gateway.rate_limit.window(), Duration::from_secs(60));
        assert_eq!(config.model_manager_config().local_paths.len(), 5);
    }

    #[test]
    fn test_overrides() {
        let config = ServingConfig::from_lookup(lookup(&[
            ("RATE_LIMIT_REQUESTS", "3"),
            ("RATE_LIMIT_WINDOW", "10"),
            ("MODEL_PATHS", "/srv/{version}.json, /srv/model.bin"),
            ("ALLOW_SYNTHETIC_MODEL", "off"),
            ("REDIS_URL", "redis://cache:6379/0"),
            ("MODEL_REGISTRY_DIR", ""),
            ("LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(config.rate_limit_requests, 3);
        assert_eq!(config.model_paths, vec!["/srv/{version}.json", "/srv/model.bin"]);
        assert!(!config.allow_synthetic_model);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379/0"));
        assert_eq!(config.model_registry_dir, None);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(!config.model_manager_config().allow_synthetic);
    }

    #[test]
    fn test_invalid_values() {
        let err = ServingConfig::from_lookup(lookup(&[("RATE_LIMIT_REQUESTS", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "RATE_LIMIT_REQUESTS",
                ..
            }
        ));

        let err = ServingConfig::from_lookup(lookup(&[("RATE_LIMIT_WINDOW", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::Policy(PolicyError::ZeroWindow));
    }

    #[test]
    fn test_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# serving overrides\nEXPLAIN_MAX_DISPLAY=4\nINFERENCE_TIMEOUT_MS=\"2500\"\n",
        )
        .unwrap();

        let config = ServingConfig::from_env_file(&path).unwrap();
        assert_eq!(config.explain_max_display, 4);
        assert_eq!(config.inference_timeout_ms, 2_500);

        assert!(matches!(
            ServingConfig::from_env_file(dir.path().join("missing.env")),
            Err(ConfigError::EnvFile { .. })
        ));

        std::fs::write(&path, "EXPLAIN_MAX_DISPLAY=several\n").unwrap();
        assert!(matches!(
            ServingConfig::from_env_file(&path),
            Err(ConfigError::Invalid {
                var: "EXPLAIN_MAX_DISPLAY",
                ..
            })
        ));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ServingConfig =
            serde_json::from_str(r#"{"model_name": "m", "rate_limit_requests": 5}"#).unwrap();
        assert_eq!(config.model_name, "m");
        assert_eq!(config.rate_limit_window_secs, 60);
    }
}
