// Configuration management for Stayforge services
//
// Values are layered into one map: files and explicit `set` calls first,
// then lookups fall back to `<PREFIX>_<KEY>` environment variables.

pub mod env;
pub mod error;
pub mod loader;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Main configuration manager
#[derive(Clone, Default)]
pub struct ConfigManager {
    config: Arc<RwLock<HashMap<String, Value>>>,
    env: EnvLoader,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager whose environment lookups use `PREFIX_KEY`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            config: Arc::new(RwLock::new(HashMap::new())),
            env: EnvLoader::new(Some(prefix.into())),
        }
    }

    /// Copy every prefixed environment variable into the map.
    pub fn load_env(&self) -> Result<()> {
        let env_vars = self.env.load()?;

        let mut config = self.config.write();
        for (key, value) in env_vars {
            config.insert(key, Value::String(value));
        }

        Ok(())
    }

    /// Load a `.env` file into the process environment, then `load_env`.
    pub fn load_dotenv(&self, path: Option<&Path>) -> Result<()> {
        if let Some(path) = path {
            dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
        } else {
            // A missing .env is fine
            dotenvy::dotenv().ok();
        }
        self.load_env()
    }

    /// Merge the top-level keys of a configuration file.
    pub fn load_file(&self, path: impl AsRef<Path>, format: FileFormat) -> Result<()> {
        let data = ConfigLoader::new(format).load_file(path)?;
        self.merge_value(data)
    }

    /// Merge the top-level keys of an in-memory document.
    pub fn load_str(&self, content: &str, format: FileFormat) -> Result<()> {
        let data = ConfigLoader::new(format).parse(content)?;
        self.merge_value(data)
    }

    fn merge_value(&self, data: Value) -> Result<()> {
        match data {
            Value::Object(map) => {
                let mut config = self.config.write();
                for (key, value) in map {
                    config.insert(key.to_lowercase(), value);
                }
                Ok(())
            }
            other => Err(ConfigError::ParseError(format!(
                "expected a table at the top level, found {}",
                other
            ))),
        }
    }

    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        let json_value = serde_json::to_value(value)
            .map_err(|e| ConfigError::SerializationError(e.to_string()))?;

        self.config.write().insert(key.to_lowercase(), json_value);
        Ok(())
    }

    /// Typed lookup.
    ///
    /// String values (from the environment or `.env` files) are re-read as
    /// JSON when they don't deserialize directly, so `"30"` yields `30u64`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .raw(key)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

        coerce(key, value)
    }

    /// Typed lookup returning `None` for a missing key but an error for a
    /// present key with a bad value.
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.raw(key) {
            Some(value) => coerce(key, value).map(Some),
            None => Ok(None),
        }
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str) -> Result<String> {
        self.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.raw(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.config.read().keys().cloned().collect()
    }

    fn raw(&self, key: &str) -> Option<Value> {
        let key = key.to_lowercase();
        if let Some(value) = self.config.read().get(&key) {
            return Some(value.clone());
        }
        self.env.load_var(&key).ok().map(Value::String)
    }
}

fn coerce<T: DeserializeOwned>(key: &str, value: Value) -> Result<T> {
    match serde_json::from_value::<T>(value.clone()) {
        Ok(v) => Ok(v),
        Err(first) => {
            if let Value::String(s) = &value
                && let Ok(v) = serde_json::from_str::<T>(s.trim())
            {
                return Ok(v);
            }
            Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: first.to_string(),
            })
        }
    }
}
