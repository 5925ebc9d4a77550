//! Configuration plumbing shared by fdir servers.
//!
//! A configuration type implements [`Config`] to be parsed from a TOML
//! document, checked, rendered back and partially refreshed at runtime.
//! [`ConfigManager`] keeps the live copy behind an `ArcSwap` so readers
//! never block a reload.

mod manager;

pub use manager::ConfigManager;

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("field `{field}` has the wrong type, expected {expected}")]
    TypeMismatch { field: String, expected: String },

    #[error("field `{field}` = {value} is out of range (min {min:?}, max {max:?})")]
    OutOfRange {
        field: String,
        value: String,
        min: Option<String>,
        max: Option<String>,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub trait Config: Sized + Send + Sync + 'static {
    fn from_toml(value: &toml::Value) -> Result<Self, ConfigError>;

    /// Copy the fields that may change without a restart.
    fn hot_update(&mut self, other: &Self);

    fn render(&self) -> String;

    fn validate(&self) -> Result<(), ConfigError>;
}

/// Deserialize a section with serde, reporting type errors as `ConfigError`.
pub fn from_toml_section<T: DeserializeOwned>(value: &toml::Value) -> Result<T, ConfigError> {
    Ok(value.clone().try_into()?)
}

/// Check `value >= min`, producing `OutOfRange` otherwise.
pub fn check_min<V>(field: &str, value: V, min: V) -> Result<(), ConfigError>
where
    V: PartialOrd + std::fmt::Display,
{
    if value < min {
        return Err(ConfigError::OutOfRange {
            field: field.into(),
            value: value.to_string(),
            min: Some(min.to_string()),
            max: None,
        });
    }
    Ok(())
}
