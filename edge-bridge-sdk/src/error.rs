use tokio::sync::mpsc;
use thiserror::Error;

/// Errors produced by cloud sessions, links and upstream clients
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// Upstream rejected the credentials of the identity (expired or revoked)
    #[error("Unauthorized for identity '{identity}': {reason}")]
    Unauthorized { identity: String, reason: String },

    /// Network or protocol failure talking to the upstream hub
    #[error("Upstream transport error: {reason}")]
    Transport { reason: String },

    /// Message publishing failed
    #[error("Failed to publish message upstream: {reason}")]
    PublishFailed { reason: String },

    /// Upstream answered a request with a non-success status
    #[error("Upstream request failed with status {status}: {reason}")]
    RequestFailed { status: u16, reason: String },

    /// Timeout error
    #[error("Operation timed out after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Not connected to the upstream hub
    #[error("Not connected to upstream - operation requires active connection")]
    NotConnected,

    /// Operation not supported by the upstream transport
    #[error("Operation not supported: {operation}")]
    OperationNotSupported { operation: String },

    /// The cloud session was closed; a new session must be created
    #[error("Cloud session for '{identity}' is closed")]
    SessionClosed { identity: String },

    /// Receiver-backed operation invoked before a receiver was bound
    #[error("No cloud receiver bound for '{identity}'")]
    ReceiverNotBound { identity: String },

    /// Caller supplied an invalid argument
    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    /// Identity string could not be parsed
    #[error("Invalid identity '{value}': {reason}")]
    InvalidIdentity { value: String, reason: String },

    /// Invalid message format
    #[error("Invalid message format: {reason}")]
    InvalidMessageFormat { reason: String },

    /// Serialization error
    #[error("Serialization failed: {reason}")]
    SerializationError { reason: String },

    /// Remote disposition carried an outcome descriptor with no feedback mapping
    #[error("Unrecognized disposition outcome descriptor 0x{descriptor:x}")]
    UnrecognizedOutcome { descriptor: u64 },

    /// Link did not reach the open state in time
    #[error("Link open timed out after {timeout_ms}ms")]
    LinkOpenTimeout { timeout_ms: u64 },

    /// Peer refused the requested link settings
    #[error("Link negotiation rejected: {reason}")]
    LinkNegotiationRejected { reason: String },

    /// Any other link-level failure
    #[error("Link error: {reason}")]
    LinkError { reason: String },

    /// Data send error
    #[error("Data send error: {message}")]
    DataSendError { message: String },

    /// Runtime execution error (e.g. task cancellation)
    #[error("Runtime error: {reason}")]
    RuntimeError { reason: String },
}

impl CloudError {
    /// Authorization or credential-expiry failure.
    ///
    /// Sessions that observe this class of error tear themselves down.
    #[inline]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, CloudError::Unauthorized { .. })
            || matches!(self, CloudError::RequestFailed { status: 401, .. })
    }

    /// Failures worth retrying by the caller.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CloudError::Transport { .. }
                | CloudError::Timeout { .. }
                | CloudError::NotConnected
                | CloudError::PublishFailed { .. }
        )
    }
}

impl From<serde_json::Error> for CloudError {
    fn from(err: serde_json::Error) -> Self {
        CloudError::SerializationError {
            reason: err.to_string(),
        }
    }
}

impl<T> From<mpsc::error::SendError<T>> for CloudError {
    fn from(err: mpsc::error::SendError<T>) -> Self {
        CloudError::DataSendError {
            message: format!("Channel send failed: {err}"),
        }
    }
}
