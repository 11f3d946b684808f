//! Crate error types
//!
//! Admission outcomes use the typed [`AdmissionError`] directly; this module
//! carries the top-level [`Error`] for fallible setup and I/O paths (server
//! bind, state file handling, configuration loading).

use crate::admission::AdmissionError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O failure (socket, child pipe, state file)
    Io(std::io::Error),
    /// Configuration was rejected
    Config(ConfigError),
    /// Admission was refused
    Admission(AdmissionError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Admission(e) => write!(f, "Admission refused: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Config(e) => Some(e),
            Error::Admission(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<AdmissionError> for Error {
    fn from(e: AdmissionError) -> Self {
        Error::Admission(e)
    }
}

/// Error type for configuration loading and validation
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// An environment variable held a value that failed to parse
    InvalidEnv { key: &'static str, value: String },
    /// A validated bound was violated
    Constraint(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidEnv { key, value } => {
                write!(f, "Invalid value for {}: {:?}", key, value)
            }
            ConfigError::Constraint(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
