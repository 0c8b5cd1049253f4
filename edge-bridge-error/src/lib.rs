use anyhow::Error as AnyhowError;
use config::ConfigError;
use edge_bridge_sdk::CloudError;
use serde_json::Error as SerdeJsonError;
use std::{error::Error as StdError, io::Error as IoError};
use thiserror::Error;
use tokio::task::JoinError;

pub type EBResult<T, E = EBError> = anyhow::Result<T, E>;

/// Application-level error used by the binary and the ambient crates.
///
/// Domain failures coming out of the bridge itself are carried as
/// [`CloudError`] and wrapped transparently.
#[derive(Error, Debug, Default)]
pub enum EBError {
    #[error("service unavailable")]
    #[default]
    ServiceUnavailable,
    #[error("{0}")]
    JoinError(#[from] JoinError),
    #[error("{0}")]
    StdError(#[from] Box<dyn StdError + Send + Sync>),
    #[error("{0}")]
    IoError(#[from] IoError),
    #[error("{0}")]
    Msg(String),
    #[error("{0}")]
    Anyhow(#[from] AnyhowError),
    #[error("{0}")]
    Json(#[from] SerdeJsonError),
    #[error("{0}")]
    ConfigError(#[from] ConfigError),
    #[error("{0}")]
    Cloud(#[from] CloudError),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Initialization error: {0}")]
    InitializationError(String),
    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

impl From<String> for EBError {
    #[inline]
    fn from(e: String) -> Self {
        EBError::Msg(e)
    }
}

impl From<&str> for EBError {
    #[inline]
    fn from(e: &str) -> Self {
        EBError::Msg(e.to_string())
    }
}
