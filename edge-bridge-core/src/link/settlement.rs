use super::transport::{LinkSettings, ReceiverSettleMode, SenderSettleMode};
use edge_bridge_sdk::QualityOfService;

/// Settle modes a link uses for one delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkSettlementPolicy {
    pub sender: SenderSettleMode,
    pub receiver: ReceiverSettleMode,
}

impl LinkSettlementPolicy {
    /// Settlement for `qos`:
    ///
    /// | QoS         | sender    | receiver |
    /// |-------------|-----------|----------|
    /// | AtMostOnce  | Settled   | First    |
    /// | AtLeastOnce | Unsettled | First    |
    /// | ExactlyOnce | Unsettled | Second   |
    pub const fn for_qos(qos: QualityOfService) -> Self {
        match qos {
            QualityOfService::AtMostOnce => Self {
                sender: SenderSettleMode::Settled,
                receiver: ReceiverSettleMode::First,
            },
            QualityOfService::AtLeastOnce => Self {
                sender: SenderSettleMode::Unsettled,
                receiver: ReceiverSettleMode::First,
            },
            QualityOfService::ExactlyOnce => Self {
                sender: SenderSettleMode::Unsettled,
                receiver: ReceiverSettleMode::Second,
            },
        }
    }

    /// Whether deliveries wait for a peer disposition
    #[inline]
    pub const fn awaits_disposition(&self) -> bool {
        !matches!(self.sender, SenderSettleMode::Settled)
    }

    /// Write both settle modes into `settings`
    pub fn apply(&self, settings: &mut LinkSettings) {
        settings.sender_settle_mode = Some(self.sender);
        settings.receiver_settle_mode = Some(self.receiver);
    }
}
