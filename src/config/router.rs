//! Router configuration.

use super::parse::{env_bool, env_or, env_parse};
use super::ConfigError;
use crate::router::ExecutionMode;

/// Router settings loaded from environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterConfig {
    /// Base path prepended to every route (default: `/`).
    pub context_path: String,
    /// Match static segments case-insensitively.
    pub ignore_case: bool,
    /// Treat `/a/` and `/a` as the same path.
    pub ignore_trailing_slash: bool,
    /// Where routes without an explicit dispatch run.
    pub execution_mode: ExecutionMode,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            context_path: "/".to_string(),
            ignore_case: false,
            ignore_trailing_slash: false,
            execution_mode: ExecutionMode::EventLoop,
        }
    }
}

impl RouterConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let context_path = env_or("CONTEXT_PATH", "/");
        if !context_path.starts_with('/') {
            return Err(ConfigError::invalid("CONTEXT_PATH", "must start with '/'"));
        }
        Ok(Self {
            context_path,
            ignore_case: env_bool("ROUTER_IGNORE_CASE", false)?,
            ignore_trailing_slash: env_bool("ROUTER_IGNORE_TRAILING_SLASH", false)?,
            execution_mode: env_parse("EXECUTION_MODE", ExecutionMode::EventLoop)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_config_from_env() {
        std::env::set_var("CONTEXT_PATH", "/app");
        std::env::set_var("EXECUTION_MODE", "worker");
        std::env::set_var("ROUTER_IGNORE_CASE", "1");

        let config = RouterConfig::from_env().unwrap();
        assert_eq!(config.context_path, "/app");
        assert_eq!(config.execution_mode, ExecutionMode::Worker);
        assert!(config.ignore_case);
        assert!(!config.ignore_trailing_slash);

        std::env::set_var("EXECUTION_MODE", "threads");
        assert!(matches!(
            RouterConfig::from_env(),
            Err(ConfigError::Parse { key, .. }) if key == "EXECUTION_MODE"
        ));

        std::env::set_var("EXECUTION_MODE", "worker");
        std::env::set_var("CONTEXT_PATH", "app");
        assert!(RouterConfig::from_env().is_err());

        std::env::remove_var("CONTEXT_PATH");
        std::env::remove_var("EXECUTION_MODE");
        std::env::remove_var("ROUTER_IGNORE_CASE");
    }
}
