//! Typed access to a module's `params` section.
//!
//! Two loading modes:
//!
//! 1. **Lenient** (`module_params_or_default`): missing params fall back to
//!    `T::default()`. For modules that can operate unconfigured.
//! 2. **Strict** (`module_params_required`): params must be present and
//!    valid. For modules that cannot operate without explicit configuration.

use serde::de::DeserializeOwned;

use crate::repository::ModuleConfig;

/// Configuration error for typed params operations.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("module '{module}' has no params section")]
    MissingParams { module: String },
    #[error("invalid params for module '{module}': {source}")]
    InvalidParams {
        module: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Lenient loader: absent or null params yield `T::default()`; present but
/// invalid params are an error.
///
/// # Errors
/// Returns `ConfigError::InvalidParams` if the params section exists but
/// cannot be deserialized into `T`.
pub fn module_params_or_default<T: DeserializeOwned + Default>(
    config: &ModuleConfig,
) -> Result<T, ConfigError> {
    if config.params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.params.clone()).map_err(|source| ConfigError::InvalidParams {
        module: config.id.clone(),
        source,
    })
}

/// Strict loader: params must be present and valid.
///
/// # Errors
/// Returns `ConfigError::MissingParams` when the section is absent,
/// `ConfigError::InvalidParams` when it cannot be deserialized into `T`.
pub fn module_params_required<T: DeserializeOwned>(
    config: &ModuleConfig,
) -> Result<T, ConfigError> {
    if config.params.is_null() {
        return Err(ConfigError::MissingParams {
            module: config.id.clone(),
        });
    }
    serde_json::from_value(config.params.clone()).map_err(|source| ConfigError::InvalidParams {
        module: config.id.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Deserialize, Default)]
    struct TestParams {
        #[serde(default)]
        endpoint: String,
        #[serde(default)]
        timeout_ms: u64,
    }

    fn config_with(params: serde_json::Value) -> ModuleConfig {
        ModuleConfig::new("m1", "Module One", "test").params(params)
    }

    #[test]
    fn lenient_parses_present_params() {
        let cfg = config_with(json!({"endpoint": "tcp://10.0.0.1:4001", "timeout_ms": 250}));
        let params: TestParams = module_params_or_default(&cfg).unwrap();
        assert_eq!(params.endpoint, "tcp://10.0.0.1:4001");
        assert_eq!(params.timeout_ms, 250);
    }

    #[test]
    fn lenient_missing_params_returns_default() {
        let cfg = ModuleConfig::new("m1", "Module One", "test");
        let params: TestParams = module_params_or_default(&cfg).unwrap();
        assert_eq!(params, TestParams::default());
    }

    #[test]
    fn lenient_invalid_params_is_error() {
        let cfg = config_with(json!({"timeout_ms": "not_a_number"}));
        let err = module_params_or_default::<TestParams>(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParams { module, .. } if module == "m1"));
    }

    #[test]
    fn strict_missing_params_is_error() {
        let cfg = ModuleConfig::new("m1", "Module One", "test");
        let err = module_params_required::<TestParams>(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::MissingParams { module } if module == "m1"));
    }

    #[test]
    fn strict_parses_present_params() {
        let cfg = config_with(json!({"endpoint": "serial:///dev/ttyUSB0"}));
        let params: TestParams = module_params_required(&cfg).unwrap();
        assert_eq!(params.endpoint, "serial:///dev/ttyUSB0");
    }
}
