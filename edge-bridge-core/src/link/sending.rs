use super::{
    config::LinkConfig,
    converter::AmqpMessageConverter,
    feedback::FeedbackTranslator,
    settlement::LinkSettlementPolicy,
    transport::{AmqpLink, Outcome},
    LinkHandler, LinkType,
};
use crate::cloud::proxy::CloudProxy;
use async_trait::async_trait;
use bytes::Bytes;
use edge_bridge_sdk::{CloudError, CloudResult, Identity, Message, MessageConverter, QualityOfService};
use std::{sync::Arc, time::Duration};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound link delivering cloud-to-device messages to a local session.
///
/// Settlement is fixed by the QoS the handler was created with. For
/// unsettled deliveries the peer's disposition is turned into feedback on
/// the owning cloud proxy from a background task, so a slow upstream never
/// holds up the link.
pub struct SendingLinkHandler {
    identity: Identity,
    link: Arc<dyn AmqpLink>,
    proxy: Arc<dyn CloudProxy>,
    qos: QualityOfService,
    policy: LinkSettlementPolicy,
    open_timeout: Duration,
    converter: AmqpMessageConverter,
}

impl SendingLinkHandler {
    pub fn new(
        identity: Identity,
        link: Arc<dyn AmqpLink>,
        proxy: Arc<dyn CloudProxy>,
        qos: QualityOfService,
    ) -> Self {
        Self {
            identity,
            link,
            proxy,
            qos,
            policy: LinkSettlementPolicy::for_qos(qos),
            open_timeout: LinkConfig::default().open_timeout(),
            converter: AmqpMessageConverter,
        }
    }

    /// Handler with the QoS and open timeout of the `[link]` settings
    pub fn from_config(
        identity: Identity,
        link: Arc<dyn AmqpLink>,
        proxy: Arc<dyn CloudProxy>,
        config: &LinkConfig,
    ) -> Self {
        Self {
            open_timeout: config.open_timeout(),
            ..Self::new(identity, link, proxy, config.qos)
        }
    }

    #[inline]
    pub fn open_timeout(&self) -> Duration {
        self.open_timeout
    }

    /// Open the link with the configured timeout
    pub async fn attach(&self) -> CloudResult<()> {
        self.open(self.open_timeout).await
    }

    #[inline]
    pub fn settlement(&self) -> LinkSettlementPolicy {
        self.policy
    }

    /// Transfer `message` on the link.
    ///
    /// Settled links complete once the transfer is done. Unsettled links
    /// return as soon as the transfer is queued; the disposition is handled
    /// in the background.
    pub async fn send_message(&self, message: &Message) -> CloudResult<()> {
        let mut amqp = self.converter.from_message(message)?;
        let delivery_id = delivery_id(message);
        amqp.delivery_tag = Bytes::copy_from_slice(delivery_id.as_bytes());

        if !self.policy.awaits_disposition() {
            self.link.send(amqp).await?;
            debug!(identity = %self.identity, %delivery_id, "Sent pre-settled delivery");
            return Ok(());
        }

        let disposition = self.link.register_disposition(amqp.delivery_tag.clone());
        self.link.send_no_wait(amqp)?;
        debug!(identity = %self.identity, %delivery_id, "Sent unsettled delivery");

        spawn_disposition_listener(
            self.identity.clone(),
            Arc::clone(&self.proxy),
            delivery_id,
            disposition,
        );
        Ok(())
    }
}

#[async_trait]
impl LinkHandler for SendingLinkHandler {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn link_type(&self) -> LinkType {
        LinkType::Sending
    }

    fn qos(&self) -> QualityOfService {
        self.qos
    }

    async fn open(&self, timeout: Duration) -> CloudResult<()> {
        let mut settings = self.link.settings();
        self.policy.apply(&mut settings);
        self.link.set_settings(settings);

        match tokio::time::timeout(timeout, self.link.open(timeout)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CloudError::LinkOpenTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }

        info!(
            identity = %self.identity,
            qos = ?self.qos,
            sender = ?self.policy.sender,
            receiver = ?self.policy.receiver,
            "Sending link opened"
        );
        Ok(())
    }

    async fn close(&self) -> CloudResult<()> {
        self.link.close().await?;
        debug!(identity = %self.identity, "Sending link closed");
        Ok(())
    }
}

/// Lock token of a cloud-to-device message, or a fresh id when the message
/// has none (or one that is not a UUID).
fn delivery_id(message: &Message) -> Uuid {
    message
        .lock_token()
        .and_then(|token| Uuid::parse_str(token).ok())
        .unwrap_or_else(Uuid::new_v4)
}

fn spawn_disposition_listener(
    identity: Identity,
    proxy: Arc<dyn CloudProxy>,
    delivery_id: Uuid,
    disposition: oneshot::Receiver<Outcome>,
) {
    tokio::spawn(async move {
        let outcome = match disposition.await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(%identity, %delivery_id, "Delivery dropped without disposition");
                return;
            }
        };

        let status = match FeedbackTranslator::translate(&outcome) {
            Ok(status) => status,
            Err(e) => {
                warn!(%identity, %delivery_id, error = %e, "Ignoring disposition");
                return;
            }
        };

        let message_id = delivery_id.hyphenated().to_string();
        match proxy.send_feedback(&message_id, status).await {
            Ok(()) => debug!(%identity, %message_id, %status, "Feedback sent"),
            Err(e) => warn!(%identity, %message_id, %status, error = %e, "Failed to send feedback"),
        }
    });
}
