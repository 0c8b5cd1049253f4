use super::{config::UpstreamConfig, topics};
use arc_swap::ArcSwapOption;
use backoff::backoff::Backoff;
use bytes::Bytes;
use edge_bridge_sdk::{
    build_exponential_backoff, CloudError, CloudResult, ConnectionStatus,
    ConnectionStatusChangeReason, ConnectionStatusHandler, Identity,
};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet,
    Publish, QoS,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection state of one upstream MQTT session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Failed(String),
}

/// Shared client entry for lock-free access.
///
/// The supervisor owns the lifecycle and swaps the client in on CONNACK and
/// out on disconnection.
pub(super) struct ClientEntry {
    pub client: ArcSwapOption<AsyncClient>,
    pub healthy: AtomicBool,
    pub shutdown: AtomicBool,
    /// Last error message for observability
    pub last_error: Mutex<Option<String>>,
    /// Set once the hub refused the credentials; publishing cannot succeed
    refusal: Mutex<Option<CloudError>>,
}

impl ClientEntry {
    #[inline]
    pub fn new_empty() -> Self {
        Self {
            client: ArcSwapOption::from(None),
            healthy: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            last_error: Mutex::new(None),
            refusal: Mutex::new(None),
        }
    }

    #[inline]
    pub fn update_error(&self, error: String) {
        if let Ok(mut last_error) = self.last_error.lock() {
            *last_error = Some(error);
        }
    }

    #[inline]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|guard| guard.clone())
    }

    #[inline]
    pub fn clear_error(&self) {
        if let Ok(mut last_error) = self.last_error.lock() {
            *last_error = None;
        }
    }

    fn disconnected(&self) {
        self.client.store(None);
        self.healthy.store(false, Ordering::Release);
    }

    /// Record a credential refusal; every later publish fails with it
    pub fn refuse(&self, error: CloudError) {
        self.disconnected();
        if let Ok(mut refusal) = self.refusal.lock() {
            *refusal = Some(error);
        }
    }

    fn refusal(&self) -> Option<CloudError> {
        self.refusal.lock().ok().and_then(|guard| guard.clone())
    }

    /// Publish through the current connection
    pub async fn publish(&self, topic: String, qos: QoS, payload: Bytes) -> CloudResult<()> {
        if let Some(refusal) = self.refusal() {
            return Err(refusal);
        }
        if self.shutdown.load(Ordering::Acquire) || !self.healthy.load(Ordering::Acquire) {
            return Err(CloudError::NotConnected);
        }
        let client = self.client.load_full().ok_or(CloudError::NotConnected)?;
        client
            .publish_bytes(topic, qos, false, payload)
            .await
            .map_err(|e| CloudError::PublishFailed {
                reason: e.to_string(),
            })
    }
}

pub(super) type SharedClient = Arc<ClientEntry>;

/// Forwards connection status changes to the installed handler
pub(super) struct StatusNotifier {
    identity: Identity,
    handler: ArcSwapOption<ConnectionStatusHandler>,
}

impl StatusNotifier {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            handler: ArcSwapOption::from(None),
        }
    }

    pub fn set(&self, handler: ConnectionStatusHandler) {
        self.handler.store(Some(Arc::new(handler)));
    }

    pub fn notify(&self, status: ConnectionStatus, reason: ConnectionStatusChangeReason) {
        debug!(identity = %self.identity, %status, %reason, "Upstream connection status changed");
        if let Some(handler) = self.handler.load_full() {
            if let Err(e) = handler(status, reason) {
                warn!(identity = %self.identity, error = %e, "Connection status handler failed");
            }
        }
    }
}

/// How one event loop run ended
struct LoopExit {
    seen_active: bool,
    reason: ConnectionStatusChangeReason,
    /// The hub refused the credentials; reconnecting cannot help
    fatal: bool,
}

/// Upstream connection supervisor with auto-reconnect.
///
/// Drives the MQTT event loop of one identity, reconnects with exponential
/// backoff and forwards inbound publishes to the dispatcher.
pub(super) struct UpstreamSupervisor {
    config: Arc<UpstreamConfig>,
    identity: Identity,
    options: MqttOptions,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: mpsc::Sender<Publish>,
    shared_client: SharedClient,
    status: Arc<StatusNotifier>,
}

impl UpstreamSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<UpstreamConfig>,
        identity: Identity,
        options: MqttOptions,
        cancel: CancellationToken,
        state_tx: watch::Sender<ConnectionState>,
        events_tx: mpsc::Sender<Publish>,
        shared_client: SharedClient,
        status: Arc<StatusNotifier>,
    ) -> Self {
        Self {
            config,
            identity,
            options,
            cancel,
            state_tx,
            events_tx,
            shared_client,
            status,
        }
    }

    /// Spawn the supervisor loop.
    ///
    /// `max_attempts` counts consecutive attempts without a successful
    /// CONNACK; a connection that came up resets the count and the backoff.
    pub fn run(self) {
        tokio::spawn(async move {
            let retry_policy = self.config.retry_policy;
            let mut bo = build_exponential_backoff(&retry_policy);
            let mut attempt: u32 = 0;

            loop {
                if self.cancel.is_cancelled() {
                    break;
                }

                attempt += 1;
                info!(identity = %self.identity, attempt, "Upstream supervisor attempting connection");
                let _ = self.state_tx.send(ConnectionState::Connecting);

                let (client, event_loop) = AsyncClient::new(self.options.clone(), 100);
                let exit = self.run_event_loop(client, event_loop).await;

                if exit.seen_active {
                    bo.reset();
                    attempt = 0;
                }

                if self.cancel.is_cancelled() {
                    break;
                }

                if exit.fatal {
                    let reason = self
                        .shared_client
                        .last_error()
                        .unwrap_or_else(|| "credentials rejected".to_string());
                    self.shared_client.refuse(CloudError::Unauthorized {
                        identity: self.identity.to_string(),
                        reason: reason.clone(),
                    });
                    let _ = self.state_tx.send(ConnectionState::Failed(reason));
                    self.status
                        .notify(ConnectionStatus::Disconnected, exit.reason);
                    warn!(identity = %self.identity, reason = %exit.reason, "Upstream refused the connection, giving up");
                    return;
                }

                if !retry_policy.allows_attempt(attempt) {
                    self.give_up(format!(
                        "Max retry attempts ({:?}) exhausted",
                        retry_policy.max_attempts
                    ));
                    return;
                }

                let Some(delay) = bo.next_backoff() else {
                    self.give_up("Backoff time exhausted".to_string());
                    return;
                };

                let _ = self.state_tx.send(ConnectionState::Reconnecting);
                self.status
                    .notify(ConnectionStatus::DisconnectedRetrying, exit.reason);
                info!(
                    identity = %self.identity,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Upstream reconnect backoff"
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            self.shared_client.disconnected();
            let _ = self.state_tx.send(ConnectionState::Disconnected);
            self.status
                .notify(ConnectionStatus::Disabled, ConnectionStatusChangeReason::ClientClose);
            info!(identity = %self.identity, "Upstream supervisor cancelled");
        });
    }

    fn give_up(&self, message: String) {
        warn!(identity = %self.identity, %message, "Upstream supervisor stopped retrying");
        self.shared_client.disconnected();
        let _ = self.state_tx.send(ConnectionState::Failed(message));
        self.status.notify(
            ConnectionStatus::Disconnected,
            ConnectionStatusChangeReason::RetryExpired,
        );
    }

    async fn subscribe_required_topics(&self, client: &AsyncClient) -> CloudResult<()> {
        let qos = self.config.qos();
        let mut filters = vec![
            topics::TWIN_RESPONSE_SUB.to_string(),
            topics::TWIN_DESIRED_SUB.to_string(),
            topics::METHODS_SUB.to_string(),
        ];
        // the hub has no cloud-to-device queue for modules
        if !self.identity.is_module() {
            filters.push(topics::Topics::c2d_sub(&self.identity));
        }

        for filter in filters {
            client
                .subscribe(filter.as_str(), qos)
                .await
                .map_err(|e| CloudError::Transport {
                    reason: format!("Failed to subscribe to topic '{filter}': {e}"),
                })?;
            debug!(identity = %self.identity, topic = %filter, "Subscribed to topic");
        }
        Ok(())
    }

    async fn run_event_loop(&self, client: AsyncClient, mut event_loop: EventLoop) -> LoopExit {
        let mut seen_active = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(identity = %self.identity, "Event loop cancelled, disconnecting");
                    self.shared_client.disconnected();
                    let _ = client.disconnect().await;
                    return LoopExit {
                        seen_active,
                        reason: ConnectionStatusChangeReason::ClientClose,
                        fatal: false,
                    };
                }
                result = event_loop.poll() => match result {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(identity = %self.identity, "Upstream connection established");
                        seen_active = true;
                        self.shared_client.client.store(Some(Arc::new(client.clone())));
                        self.shared_client.healthy.store(true, Ordering::Release);
                        self.shared_client.clear_error();

                        if let Err(e) = self.subscribe_required_topics(&client).await {
                            warn!(identity = %self.identity, error = %e, "Failed to subscribe to required topics");
                            self.shared_client.update_error(e.to_string());
                        }
                        let _ = self.state_tx.send(ConnectionState::Connected);
                        self.status.notify(
                            ConnectionStatus::Connected,
                            ConnectionStatusChangeReason::ConnectionOk,
                        );
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if self.events_tx.send(publish).await.is_err() {
                            warn!(identity = %self.identity, "Events channel closed, terminating event loop");
                            self.shared_client.disconnected();
                            return LoopExit {
                                seen_active,
                                reason: ConnectionStatusChangeReason::ClientClose,
                                fatal: false,
                            };
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        info!(identity = %self.identity, "Upstream sent disconnect");
                        self.shared_client.disconnected();
                        self.shared_client.update_error("server sent disconnect".to_string());
                        let _ = self.state_tx.send(ConnectionState::Disconnected);
                        return LoopExit {
                            seen_active,
                            reason: ConnectionStatusChangeReason::CommunicationError,
                            fatal: false,
                        };
                    }
                    Ok(event) => {
                        debug!(identity = %self.identity, ?event, "MQTT event");
                    }
                    Err(e) => {
                        warn!(identity = %self.identity, error = %e, "MQTT event loop error");
                        self.shared_client.disconnected();
                        self.shared_client.update_error(e.to_string());
                        let _ = self.state_tx.send(ConnectionState::Disconnected);
                        let (reason, fatal) = classify(&e);
                        return LoopExit {
                            seen_active,
                            reason,
                            fatal,
                        };
                    }
                }
            }
        }
    }
}

/// Map an event loop failure to the reported reason and whether to give up
fn classify(err: &ConnectionError) -> (ConnectionStatusChangeReason, bool) {
    match err {
        ConnectionError::ConnectionRefused(
            ConnectReturnCode::NotAuthorized | ConnectReturnCode::BadUserNamePassword,
        ) => (ConnectionStatusChangeReason::ExpiredCredential, true),
        ConnectionError::Io(_) | ConnectionError::NetworkTimeout => {
            (ConnectionStatusChangeReason::NoNetwork, false)
        }
        _ => (ConnectionStatusChangeReason::CommunicationError, false),
    }
}
