//! Errors raised while loading or reading configuration

use std::env::VarError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// Neither a loaded value nor a `<PREFIX>_<KEY>` variable exists
    #[error("missing configuration key `{0}`")]
    KeyNotFound(String),

    /// A source (file, `.env`) could not be read
    #[error("cannot load configuration: {0}")]
    LoadError(String),

    #[error("malformed configuration: {0}")]
    ParseError(String),

    #[error("invalid value for `{key}`: {message}")]
    InvalidValue { key: String, message: String },

    #[error("cannot convert configuration value: {0}")]
    SerializationError(String),

    #[error("configuration I/O failed: {0}")]
    IoError(#[from] std::io::Error),

    #[error("environment variable {name}: {source}")]
    EnvError {
        name: String,
        #[source]
        source: VarError,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
