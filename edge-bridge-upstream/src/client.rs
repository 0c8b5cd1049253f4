use super::{
    config::UpstreamConfig,
    handlers::{self, Callbacks, PendingRequests, TwinReply},
    mqtt::mqtt_options,
    supervisor::{ClientEntry, ConnectionState, SharedClient, StatusNotifier, UpstreamSupervisor},
    topics::{self, Topics},
};
use async_trait::async_trait;
use bytes::Bytes;
use edge_bridge_sdk::{
    mqtt::router::{HandlerResult, MessageHandler, MessageRouter},
    BoxFuture, CloudClient, CloudError, CloudMessage, CloudResult, ConnectionStatusHandler,
    DesiredPropertyCallback, Identity, MethodCallback, Twin, TwinCollection,
};
use rumqttc::Publish;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upstream client of one identity over MQTT.
///
/// Publishes go through the connection the supervisor currently holds;
/// inbound publishes are routed to twin, method, desired-property and
/// cloud-to-device handlers.
pub struct MqttCloudClient {
    identity: Identity,
    config: Arc<UpstreamConfig>,
    shared_client: SharedClient,
    pending: Arc<PendingRequests>,
    callbacks: Arc<Callbacks>,
    status: Arc<StatusNotifier>,
    next_rid: AtomicU64,
    /// Held so the queue stays open for modules, which have no devicebound route
    _c2d_tx: mpsc::Sender<CloudMessage>,
    c2d_rx: Mutex<mpsc::Receiver<CloudMessage>>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl MqttCloudClient {
    /// Start the connection supervisor of `identity`.
    ///
    /// Returns as soon as the supervisor runs; operations issued before the
    /// first CONNACK fail with [`CloudError::NotConnected`].
    pub async fn connect(
        identity: Identity,
        sas_token: Option<&str>,
        config: Arc<UpstreamConfig>,
    ) -> CloudResult<Arc<Self>> {
        let options = mqtt_options(&config, &identity, sas_token)?;

        let shared_client: SharedClient = Arc::new(ClientEntry::new_empty());
        let pending = Arc::new(PendingRequests::new());
        let callbacks = Arc::new(Callbacks::default());
        let status = Arc::new(StatusNotifier::new(identity.clone()));
        let cancel = CancellationToken::new();

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (events_tx, events_rx) = mpsc::channel(1000);
        let (c2d_tx, c2d_rx) = mpsc::channel(config.c2d_queue_capacity.max(1));

        let router = Arc::new(MessageRouter::new());
        Self::setup_routes(
            &router,
            &identity,
            &config,
            &shared_client,
            &pending,
            &callbacks,
            &c2d_tx,
        )
        .await?;

        UpstreamSupervisor::new(
            Arc::clone(&config),
            identity.clone(),
            options,
            cancel.child_token(),
            state_tx,
            events_tx,
            Arc::clone(&shared_client),
            Arc::clone(&status),
        )
        .run();
        tokio::spawn(Self::event_loop_task(events_rx, router, identity.clone()));

        info!(identity = %identity, host = %config.host, port = config.port, "Upstream client started");
        Ok(Arc::new(Self {
            identity,
            config,
            shared_client,
            pending,
            callbacks,
            status,
            next_rid: AtomicU64::new(1),
            _c2d_tx: c2d_tx,
            c2d_rx: Mutex::new(c2d_rx),
            state_rx,
            cancel,
        }))
    }

    #[inline]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Last connection error, if any
    pub fn last_error(&self) -> Option<String> {
        self.shared_client.last_error()
    }

    async fn setup_routes(
        router: &MessageRouter,
        identity: &Identity,
        config: &UpstreamConfig,
        shared_client: &SharedClient,
        pending: &Arc<PendingRequests>,
        callbacks: &Arc<Callbacks>,
        c2d_tx: &mpsc::Sender<CloudMessage>,
    ) -> CloudResult<()> {
        // 1. Twin responses
        let twin_response_handler: MessageHandler = {
            let pending = Arc::clone(pending);
            Arc::new(move |topic: &str, payload: Bytes| {
                let pending = Arc::clone(&pending);
                let topic = topic.to_string();
                Box::pin(async move {
                    handlers::handle_twin_response(&topic, payload, &pending).await
                }) as BoxFuture<HandlerResult>
            })
        };
        Self::register(router, topics::TWIN_RESPONSE_SUB, twin_response_handler).await?;

        // 2. Desired property patches
        let desired_handler: MessageHandler = {
            let identity = identity.clone();
            let callbacks = Arc::clone(callbacks);
            Arc::new(move |topic: &str, payload: Bytes| {
                let identity = identity.clone();
                let callbacks = Arc::clone(&callbacks);
                let topic = topic.to_string();
                Box::pin(async move {
                    handlers::handle_desired_patch(&topic, payload, &identity, &callbacks).await
                }) as BoxFuture<HandlerResult>
            })
        };
        Self::register(router, topics::TWIN_DESIRED_SUB, desired_handler).await?;

        // 3. Direct methods
        let method_handler: MessageHandler = {
            let identity = identity.clone();
            let callbacks = Arc::clone(callbacks);
            let shared_client = Arc::clone(shared_client);
            let qos = config.qos();
            Arc::new(move |topic: &str, payload: Bytes| {
                let identity = identity.clone();
                let callbacks = Arc::clone(&callbacks);
                let shared_client = Arc::clone(&shared_client);
                let topic = topic.to_string();
                Box::pin(async move {
                    handlers::handle_method_request(
                        &topic,
                        payload,
                        &identity,
                        &callbacks,
                        &shared_client,
                        qos,
                    )
                    .await
                }) as BoxFuture<HandlerResult>
            })
        };
        Self::register(router, topics::METHODS_SUB, method_handler).await?;

        // 4. Cloud-to-device messages (devices only)
        if !identity.is_module() {
            let c2d_handler: MessageHandler = {
                let identity = identity.clone();
                let c2d_tx = c2d_tx.clone();
                Arc::new(move |topic: &str, payload: Bytes| {
                    let identity = identity.clone();
                    let c2d_tx = c2d_tx.clone();
                    let topic = topic.to_string();
                    Box::pin(async move {
                        handlers::handle_c2d_message(&topic, payload, &identity, &c2d_tx).await
                    }) as BoxFuture<HandlerResult>
                })
            };
            Self::register(router, &Topics::c2d_sub(identity), c2d_handler).await?;
        }

        Ok(())
    }

    async fn register(
        router: &MessageRouter,
        filter: &str,
        handler: MessageHandler,
    ) -> CloudResult<()> {
        router
            .register(filter, handler)
            .await
            .map_err(|e| CloudError::InvalidArgument {
                name: "topic filter".to_string(),
                reason: e.to_string(),
            })
    }

    /// Route publishes forwarded by the supervisor
    async fn event_loop_task(
        mut events_rx: mpsc::Receiver<Publish>,
        router: Arc<MessageRouter>,
        identity: Identity,
    ) {
        debug!(identity = %identity, "Upstream dispatcher started");
        while let Some(publish) = events_rx.recv().await {
            debug!(identity = %identity, topic = %publish.topic, "Received MQTT publish");
            if let Err(e) = router.route_message(&publish.topic, publish.payload).await {
                warn!(identity = %identity, topic = %publish.topic, error = %e, "Error handling MQTT message");
            }
        }
        debug!(identity = %identity, "Upstream dispatcher terminated");
    }

    fn next_rid(&self) -> String {
        self.next_rid.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Publish a twin request and wait for the response carrying its `$rid`
    async fn twin_request(
        &self,
        operation: &str,
        topic: impl FnOnce(&str) -> String,
        payload: Bytes,
    ) -> CloudResult<TwinReply> {
        let rid = self.next_rid();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(rid.clone(), tx);

        if let Err(e) = self
            .shared_client
            .publish(topic(&rid), self.config.qos(), payload)
            .await
        {
            self.pending.remove(&rid);
            return Err(e);
        }

        let timeout = self.config.operation_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => self.check_status(reply),
            // sender dropped by close()
            Ok(Err(_)) => Err(CloudError::NotConnected),
            Err(_) => {
                self.pending.remove(&rid);
                Err(CloudError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    fn check_status(&self, reply: TwinReply) -> CloudResult<TwinReply> {
        match reply.status {
            200..=299 => Ok(reply),
            401 => Err(CloudError::Unauthorized {
                identity: self.identity.to_string(),
                reason: String::from_utf8_lossy(&reply.body).into_owned(),
            }),
            status => Err(CloudError::RequestFailed {
                status,
                reason: String::from_utf8_lossy(&reply.body).into_owned(),
            }),
        }
    }

    fn closed_error(&self) -> CloudError {
        CloudError::RuntimeError {
            reason: format!("upstream client of '{}' is closed", self.identity),
        }
    }
}

#[async_trait]
impl CloudClient for MqttCloudClient {
    async fn get_twin(&self) -> CloudResult<Twin> {
        let reply = self
            .twin_request("get twin", Topics::twin_get, Bytes::new())
            .await?;
        Ok(serde_json::from_slice(&reply.body)?)
    }

    async fn send_event(&self, message: CloudMessage) -> CloudResult<()> {
        let topic = Topics::telemetry(&self.identity, &message);
        self.shared_client
            .publish(topic, self.config.qos(), message.body)
            .await
    }

    async fn send_event_batch(&self, messages: Vec<CloudMessage>) -> CloudResult<()> {
        for message in messages {
            self.send_event(message).await?;
        }
        Ok(())
    }

    async fn update_reported_properties(&self, patch: TwinCollection) -> CloudResult<()> {
        let body = Bytes::from(serde_json::to_vec(&patch)?);
        let reply = self
            .twin_request(
                "update reported properties",
                Topics::twin_reported_patch,
                body,
            )
            .await?;
        debug!(identity = %self.identity, version = ?reply.version, "Reported properties updated");
        Ok(())
    }

    async fn complete(&self, message_id: &str) -> CloudResult<()> {
        // the broker acknowledged the publish on receipt
        debug!(identity = %self.identity, message_id, "Complete");
        Ok(())
    }

    async fn abandon(&self, _message_id: &str) -> CloudResult<()> {
        Err(CloudError::OperationNotSupported {
            operation: "abandon over MQTT".to_string(),
        })
    }

    async fn reject(&self, _message_id: &str) -> CloudResult<()> {
        Err(CloudError::OperationNotSupported {
            operation: "reject over MQTT".to_string(),
        })
    }

    async fn receive_message(&self, timeout: Duration) -> CloudResult<Option<CloudMessage>> {
        let mut c2d_rx = self.c2d_rx.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(self.closed_error()),
            received = tokio::time::timeout(timeout, c2d_rx.recv()) => match received {
                Ok(Some(message)) => Ok(Some(message)),
                Ok(None) => Err(self.closed_error()),
                Err(_) => Ok(None),
            },
        }
    }

    async fn set_method_handler(&self, handler: Option<MethodCallback>) -> CloudResult<()> {
        self.callbacks.method.store(handler.map(Arc::new));
        Ok(())
    }

    async fn set_desired_property_handler(
        &self,
        handler: Option<DesiredPropertyCallback>,
    ) -> CloudResult<()> {
        self.callbacks.desired.store(handler.map(Arc::new));
        Ok(())
    }

    fn set_connection_status_changed_handler(&self, handler: ConnectionStatusHandler) {
        self.status.set(handler);
    }

    async fn close(&self) -> CloudResult<()> {
        if self.shared_client.shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(identity = %self.identity, "Closing upstream client");
        self.cancel.cancel();
        self.shared_client.client.store(None);
        self.shared_client.healthy.store(false, Ordering::Release);
        self.pending.clear();
        Ok(())
    }
}

impl Drop for MqttCloudClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
