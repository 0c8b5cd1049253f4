use async_trait::async_trait;
use bytes::Bytes;
use edge_bridge_sdk::CloudResult;
use std::{collections::BTreeMap, time::Duration};
use tokio::sync::oneshot;

/// Sender settle mode as negotiated on link attach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SenderSettleMode {
    Unsettled = 0,
    Settled = 1,
    Mixed = 2,
}

/// Receiver settle mode as negotiated on link attach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReceiverSettleMode {
    /// Receiver settles as soon as it has processed the delivery
    First = 0,
    /// Receiver settles only after the sender settled
    Second = 1,
}

/// Attach-time settings of a link.
///
/// Unset modes leave the choice to the transport default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSettings {
    pub name: String,
    pub sender_settle_mode: Option<SenderSettleMode>,
    pub receiver_settle_mode: Option<ReceiverSettleMode>,
}

/// Terminal outcome reported by the peer for an unsettled delivery.
///
/// Only the descriptor code is kept; the bridge never inspects outcome
/// fields such as rejection error details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Outcome {
    pub descriptor: u64,
}

impl Outcome {
    pub const ACCEPTED: u64 = 0x24;
    pub const REJECTED: u64 = 0x25;
    pub const RELEASED: u64 = 0x26;
    pub const MODIFIED: u64 = 0x27;

    #[inline]
    pub const fn new(descriptor: u64) -> Self {
        Self { descriptor }
    }

    #[inline]
    pub const fn accepted() -> Self {
        Self::new(Self::ACCEPTED)
    }

    #[inline]
    pub const fn rejected() -> Self {
        Self::new(Self::REJECTED)
    }

    #[inline]
    pub const fn released() -> Self {
        Self::new(Self::RELEASED)
    }

    #[inline]
    pub const fn modified() -> Self {
        Self::new(Self::MODIFIED)
    }
}

/// Message as handed to a link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmqpMessage {
    pub delivery_tag: Bytes,
    pub body: Bytes,
    pub application_properties: BTreeMap<String, String>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
}

/// Transport side of one AMQP link.
///
/// The bridge only drives the link; framing, flow control and the link
/// state machine belong to the implementation.
#[async_trait]
pub trait AmqpLink: Send + Sync {
    fn settings(&self) -> LinkSettings;

    /// Replace the attach settings; effective on the next `open`
    fn set_settings(&self, settings: LinkSettings);

    /// Attach the link.
    ///
    /// A peer refusing the negotiated settings is reported as
    /// `CloudError::LinkNegotiationRejected`.
    async fn open(&self, timeout: Duration) -> CloudResult<()>;

    async fn close(&self) -> CloudResult<()>;

    /// Queue a transfer without waiting for it to leave the link.
    ///
    /// On failure the implementation drops any disposition registered for
    /// the message's delivery tag, closing its receiver.
    fn send_no_wait(&self, message: AmqpMessage) -> CloudResult<()>;

    /// Transfer a message and wait until the link accepted it
    async fn send(&self, message: AmqpMessage) -> CloudResult<()>;

    /// Register interest in the disposition of the delivery `tag`.
    ///
    /// The receiver resolves once, when the peer settles the delivery; it
    /// errors if the link drops the delivery without an outcome.
    fn register_disposition(&self, tag: Bytes) -> oneshot::Receiver<Outcome>;
}
