// Environment variable loading

use crate::{ConfigError, Result};
use std::collections::HashMap;
use std::env;

/// Reads `PREFIX_KEY` style variables into lowercase `key` entries.
#[derive(Debug, Clone)]
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// The environment variable name a configuration key maps to.
    pub fn var_name(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        }
    }

    /// Load every variable under the prefix (or all of them without one).
    pub fn load(&self) -> Result<HashMap<String, String>> {
        let mut config = HashMap::new();
        let marker = self.prefix.as_ref().map(|p| format!("{}_", p));

        for (key, value) in env::vars() {
            match &marker {
                Some(marker) => {
                    if let Some(stripped) = key.strip_prefix(marker.as_str())
                        && !stripped.is_empty()
                    {
                        config.insert(stripped.to_lowercase(), value);
                    }
                }
                None => {
                    config.insert(key.to_lowercase(), value);
                }
            }
        }

        Ok(config)
    }

    pub fn load_var(&self, key: &str) -> Result<String> {
        let name = self.var_name(key);
        env::var(&name).map_err(|source| ConfigError::EnvError { name, source })
    }

    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // std::env::set_var is unsafe since Rust 2024; these tests only read.

    #[test]
    fn test_env_loader_with_default() {
        let loader = EnvLoader::new(None);
        let value = loader.load_var_or("NONEXISTENT_VAR_12345", "default");

        assert_eq!(value, "default");
    }

    #[test]
    fn test_env_loader_missing_var() {
        let loader = EnvLoader::new(Some("STAYFORGE_TEST".to_string()));
        let result = loader.load_var("MISSING_VAR_67890");

        assert!(result.is_err());
    }

    #[test]
    fn test_var_name_applies_prefix() {
        let loader = EnvLoader::new(Some("STAYFORGE_WEBHOOKS".to_string()));
        assert_eq!(
            loader.var_name("queue_capacity"),
            "STAYFORGE_WEBHOOKS_QUEUE_CAPACITY"
        );

        let bare = EnvLoader::default();
        assert_eq!(bare.var_name("path"), "PATH");
    }
}
