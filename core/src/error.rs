//! Error types for the IRC client

use thiserror::Error;

/// Main error type for the IRC client
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Plugin already exists: {0}")]
    DuplicatePlugin(String),

    #[error("Handler for '{command}' is already registered by plugin: {owner}")]
    DuplicateHandler { command: String, owner: String },

    #[error("Invalid access pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Generic(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Generic(s)
    }
}
