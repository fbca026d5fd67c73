//! Error types for Synheart Session

use std::path::PathBuf;

use thiserror::Error;

use crate::types::SessionState;

/// Errors reported by a fitness-tracking provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Unsupported configuration: {0}")]
    Unsupported(String),

    #[error("Unknown session handle: {0}")]
    UnknownSession(uuid::Uuid),

    #[error("Provider failure: {0}")]
    Failed(String),
}

/// Errors that can occur while driving a workout session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Cannot {action} while session is {state}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },

    #[error("Preparation failed: {0}")]
    Preparation(#[source] ProviderError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Finalization failed after {attempts} attempt(s): {message}")]
    Finalization { attempts: u32, message: String },

    #[error("No active session handle")]
    NoActiveSession,

    #[error("Coordinator has been shut down")]
    Shutdown,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}
