use crate::CloudError;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt::{self, Display, Formatter};

/// Delivery guarantee of a link, fixed when the link handler is created
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum QualityOfService {
    AtMostOnce = 0,
    #[default]
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QualityOfService {
    type Error = CloudError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(CloudError::InvalidArgument {
                name: "qos".to_string(),
                reason: format!("expected 0, 1 or 2, got {other}"),
            }),
        }
    }
}

/// Upstream acknowledgment of a cloud-to-device message
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedbackStatus {
    /// Processed successfully, remove from the queue
    Complete,
    /// Put back on the queue for redelivery
    Abandon,
    /// Discard permanently (dead-letter)
    Reject,
}

impl Display for FeedbackStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Upstream connection status as reported to status handlers
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    DisconnectedRetrying,
    Disabled,
}

/// Why the upstream connection status changed
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatusChangeReason {
    ConnectionOk,
    ExpiredCredential,
    BadCredential,
    DeviceDisabled,
    RetryExpired,
    NoNetwork,
    CommunicationError,
    ClientClose,
}

impl Display for ConnectionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Display for ConnectionStatusChangeReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
