use super::{receiver::CloudReceiver, DEFAULT_RECEIVE_TIMEOUT};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use edge_bridge_sdk::{
    CloudClient, CloudError, CloudListener, CloudMessage, CloudResult, ConnectionStatus,
    ConnectionStatusChangeReason, ConnectionStatusHandler, FeedbackStatus, Identity, Message,
    MessageConverterProvider, Twin, TwinCollection,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, info, warn};

/// Cloud side of one local device or module session
#[async_trait]
pub trait CloudProxy: Send + Sync {
    fn identity(&self) -> &Identity;

    /// Whether the session still accepts operations
    fn is_active(&self) -> bool;

    /// Close the session.
    ///
    /// Idempotent. Returns `false` only when this call performed the
    /// teardown and the teardown failed.
    async fn close(&self) -> bool;

    async fn get_twin(&self) -> CloudResult<Message>;

    async fn send_message(&self, message: Message) -> CloudResult<()>;

    async fn send_message_batch(&self, messages: Vec<Message>) -> CloudResult<()>;

    /// Apply a JSON object body as a reported property patch
    async fn update_reported_properties(&self, patch: Message) -> CloudResult<()>;

    async fn send_feedback(&self, message_id: &str, status: FeedbackStatus) -> CloudResult<()>;

    /// Attach the local listener receiving what the cloud pushes down
    async fn bind_receiver(&self, listener: Arc<dyn CloudListener>) -> CloudResult<()>;

    async fn setup_call_method(&self) -> CloudResult<()>;

    async fn remove_call_method(&self) -> CloudResult<()>;

    async fn setup_desired_property_update(&self) -> CloudResult<()>;

    async fn remove_desired_property_update(&self) -> CloudResult<()>;

    async fn start_listening(&self) -> CloudResult<()>;
}

/// Per-identity proxy owning the upstream client.
///
/// The proxy is active from construction until the first `close`, which
/// may also be triggered internally when the upstream rejects the
/// credentials. A closed proxy never reopens; callers get a new one from
/// the connection manager.
pub struct CloudSessionProxy {
    identity: Identity,
    client: Arc<dyn CloudClient>,
    converters: MessageConverterProvider,
    active: AtomicBool,
    receiver: ArcSwapOption<CloudReceiver>,
    receive_timeout: Duration,
    status_handler: Option<ConnectionStatusHandler>,
}

impl CloudSessionProxy {
    pub fn new(
        identity: Identity,
        client: Arc<dyn CloudClient>,
        converters: MessageConverterProvider,
        status_handler: Option<ConnectionStatusHandler>,
    ) -> Self {
        Self {
            identity,
            client,
            converters,
            active: AtomicBool::new(true),
            receiver: ArcSwapOption::from(None),
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            status_handler,
        }
    }

    /// Wait of each upstream receive call of receivers bound later on
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    #[inline]
    fn ensure_active(&self) -> CloudResult<()> {
        if self.active.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CloudError::SessionClosed {
                identity: self.identity.to_string(),
            })
        }
    }

    fn bound_receiver(&self) -> CloudResult<Arc<CloudReceiver>> {
        self.ensure_active()?;
        self.receiver
            .load_full()
            .ok_or_else(|| CloudError::ReceiverNotBound {
                identity: self.identity.to_string(),
            })
    }

    /// Flip the active flag and tear down.
    ///
    /// Returns `None` when another caller already closed the session,
    /// otherwise whether the teardown succeeded.
    async fn close_once(&self) -> Option<bool> {
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let receiver_result = match self.receiver.swap(None) {
            Some(receiver) => receiver.close().await,
            None => Ok(()),
        };
        let client_result = self.client.close().await;

        match receiver_result.and(client_result) {
            Ok(()) => {
                info!(identity = %self.identity, "Cloud proxy closed");
                Some(true)
            }
            Err(e) => {
                warn!(identity = %self.identity, error = %e, "Error closing cloud proxy");
                Some(false)
            }
        }
    }

    /// Failure handling shared by the send paths.
    ///
    /// A credential failure closes the session and reports
    /// `(Disconnected, ExpiredCredential)`, once, from whichever call
    /// performed the close.
    async fn handle_exception(&self, error: &CloudError) {
        if !error.is_unauthorized() {
            return;
        }

        info!(
            identity = %self.identity,
            error = %error,
            "Upstream rejected credentials, closing cloud proxy"
        );
        if self.close_once().await.is_none() {
            return;
        }

        if let Some(handler) = &self.status_handler {
            if let Err(e) = handler(
                ConnectionStatus::Disconnected,
                ConnectionStatusChangeReason::ExpiredCredential,
            ) {
                warn!(
                    identity = %self.identity,
                    error = %e,
                    "Connection status handler failed"
                );
            }
        }
    }
}

#[async_trait]
impl CloudProxy for CloudSessionProxy {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    #[inline]
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    async fn close(&self) -> bool {
        match self.close_once().await {
            Some(closed) => closed,
            None => {
                debug!(identity = %self.identity, "Cloud proxy already closed");
                true
            }
        }
    }

    async fn get_twin(&self) -> CloudResult<Message> {
        self.ensure_active()?;
        let twin = self.client.get_twin().await?;
        debug!(identity = %self.identity, "Fetched twin");
        self.converters.get::<Twin>().to_message(&twin)
    }

    async fn send_message(&self, message: Message) -> CloudResult<()> {
        self.ensure_active()?;
        let cloud_message = self.converters.get::<CloudMessage>().from_message(&message)?;

        match self.client.send_event(cloud_message).await {
            Ok(()) => {
                debug!(identity = %self.identity, "Sent message upstream");
                Ok(())
            }
            Err(e) => {
                warn!(identity = %self.identity, error = %e, "Failed to send message upstream");
                self.handle_exception(&e).await;
                Err(e)
            }
        }
    }

    async fn send_message_batch(&self, messages: Vec<Message>) -> CloudResult<()> {
        self.ensure_active()?;
        let converter = self.converters.get::<CloudMessage>();
        let cloud_messages = messages
            .iter()
            .map(|message| converter.from_message(message))
            .collect::<CloudResult<Vec<_>>>()?;
        let count = cloud_messages.len();

        match self.client.send_event_batch(cloud_messages).await {
            Ok(()) => {
                debug!(identity = %self.identity, count, "Sent message batch upstream");
                Ok(())
            }
            Err(e) => {
                warn!(
                    identity = %self.identity,
                    count,
                    error = %e,
                    "Failed to send message batch upstream"
                );
                self.handle_exception(&e).await;
                Err(e)
            }
        }
    }

    async fn update_reported_properties(&self, patch: Message) -> CloudResult<()> {
        self.ensure_active()?;
        let collection = self.converters.get::<TwinCollection>().from_message(&patch)?;
        self.client.update_reported_properties(collection).await?;
        debug!(identity = %self.identity, "Updated reported properties");
        Ok(())
    }

    async fn send_feedback(&self, message_id: &str, status: FeedbackStatus) -> CloudResult<()> {
        if message_id.trim().is_empty() {
            return Err(CloudError::InvalidArgument {
                name: "message_id".to_string(),
                reason: "must not be empty or whitespace".to_string(),
            });
        }
        self.ensure_active()?;

        match status {
            FeedbackStatus::Complete => self.client.complete(message_id).await?,
            FeedbackStatus::Abandon => self.client.abandon(message_id).await?,
            FeedbackStatus::Reject => self.client.reject(message_id).await?,
        }
        debug!(identity = %self.identity, message_id, %status, "Sent feedback");
        Ok(())
    }

    async fn bind_receiver(&self, listener: Arc<dyn CloudListener>) -> CloudResult<()> {
        self.ensure_active()?;
        let receiver = Arc::new(
            CloudReceiver::new(
                self.identity.clone(),
                Arc::clone(&self.client),
                self.converters.clone(),
                listener,
            )
            .with_receive_timeout(self.receive_timeout),
        );

        if let Some(previous) = self.receiver.swap(Some(receiver)) {
            warn!(
                identity = %self.identity,
                listening = previous.is_listening(),
                "Replacing bound cloud receiver, its subscriptions are dropped"
            );
            if let Err(e) = previous.close().await {
                warn!(
                    identity = %self.identity,
                    error = %e,
                    "Failed to close replaced cloud receiver"
                );
            }
        }

        // close() may have won the race while the receiver was swapped in
        if !self.is_active() {
            if let Some(orphan) = self.receiver.swap(None) {
                if let Err(e) = orphan.close().await {
                    warn!(
                        identity = %self.identity,
                        error = %e,
                        "Failed to close receiver bound to a closed proxy"
                    );
                }
            }
            return Err(CloudError::SessionClosed {
                identity: self.identity.to_string(),
            });
        }
        Ok(())
    }

    async fn setup_call_method(&self) -> CloudResult<()> {
        self.bound_receiver()?.setup_call_method().await
    }

    async fn remove_call_method(&self) -> CloudResult<()> {
        self.bound_receiver()?.remove_call_method().await
    }

    async fn setup_desired_property_update(&self) -> CloudResult<()> {
        self.bound_receiver()?.setup_desired_property_update().await
    }

    async fn remove_desired_property_update(&self) -> CloudResult<()> {
        self.bound_receiver()?.remove_desired_property_update().await
    }

    async fn start_listening(&self) -> CloudResult<()> {
        self.bound_receiver()?.start_listening()
    }
}
