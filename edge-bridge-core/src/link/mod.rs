mod config;
mod converter;
mod feedback;
mod sending;
mod settlement;
mod transport;

pub use config::LinkConfig;
pub use converter::AmqpMessageConverter;
pub use feedback::FeedbackTranslator;
pub use sending::SendingLinkHandler;
pub use settlement::LinkSettlementPolicy;
pub use transport::{
    AmqpLink, AmqpMessage, LinkSettings, Outcome, ReceiverSettleMode, SenderSettleMode,
};

use async_trait::async_trait;
use edge_bridge_sdk::{CloudResult, Identity, QualityOfService};
use std::time::Duration;

/// Kind of link a handler owns, seen from the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    /// Outbound link delivering cloud-to-device messages to a local session
    Sending,
}

/// Owner of one protocol link of a local session
#[async_trait]
pub trait LinkHandler: Send + Sync {
    fn identity(&self) -> &Identity;

    fn link_type(&self) -> LinkType;

    fn qos(&self) -> QualityOfService;

    /// Negotiate settlement and open the link, bounded by `timeout`
    async fn open(&self, timeout: Duration) -> CloudResult<()>;

    async fn close(&self) -> CloudResult<()>;
}
