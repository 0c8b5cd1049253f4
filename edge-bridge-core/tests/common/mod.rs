#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use edge_bridge_core::link::{AmqpLink, AmqpMessage, LinkSettings, Outcome};
use edge_bridge_sdk::{
    CloudClient, CloudClientProvider, CloudError, CloudListener, CloudMessage, CloudResult,
    ConnectionStatus, ConnectionStatusChangeReason, ConnectionStatusHandler,
    DesiredPropertyCallback, DirectMethodRequest, DirectMethodResponse, Identity, Message,
    MethodCallback, Twin, TwinCollection,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds or `timeout` passes
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn device(id: &str) -> Identity {
    Identity::device(id).unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetTwin,
    SendEvent(CloudMessage),
    SendEventBatch(Vec<CloudMessage>),
    UpdateReported(TwinCollection),
    Complete(String),
    Abandon(String),
    Reject(String),
    SetMethodHandler(bool),
    SetDesiredHandler(bool),
    Close,
}

/// Upstream client recording every call
pub struct RecordingClient {
    calls: Mutex<Vec<Call>>,
    twin: Mutex<Twin>,
    send_error: Mutex<Option<CloudError>>,
    close_error: Mutex<Option<CloudError>>,
    close_delay: Mutex<Duration>,
    inbox_tx: mpsc::UnboundedSender<CloudMessage>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<CloudMessage>>,
    method_handler: Mutex<Option<MethodCallback>>,
    desired_handler: Mutex<Option<DesiredPropertyCallback>>,
    status_handler: Mutex<Option<ConnectionStatusHandler>>,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            twin: Mutex::new(Twin::default()),
            send_error: Mutex::new(None),
            close_error: Mutex::new(None),
            close_delay: Mutex::new(Duration::ZERO),
            inbox_tx,
            inbox: tokio::sync::Mutex::new(inbox),
            method_handler: Mutex::new(None),
            desired_handler: Mutex::new(None),
            status_handler: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| wanted(c)).count()
    }

    pub fn close_count(&self) -> usize {
        self.count(|c| *c == Call::Close)
    }

    pub fn set_twin(&self, twin: Twin) {
        *self.twin.lock().unwrap() = twin;
    }

    pub fn fail_sends_with(&self, error: CloudError) {
        *self.send_error.lock().unwrap() = Some(error);
    }

    pub fn fail_close_with(&self, error: CloudError) {
        *self.close_error.lock().unwrap() = Some(error);
    }

    pub fn delay_close(&self, delay: Duration) {
        *self.close_delay.lock().unwrap() = delay;
    }

    /// Queue a cloud-to-device message for `receive_message`
    pub fn push_c2d(&self, message: CloudMessage) {
        self.inbox_tx.send(message).unwrap();
    }

    pub fn method_handler(&self) -> Option<MethodCallback> {
        self.method_handler.lock().unwrap().clone()
    }

    pub fn desired_handler(&self) -> Option<DesiredPropertyCallback> {
        self.desired_handler.lock().unwrap().clone()
    }

    /// Report a status change the way a transport would
    pub fn emit_status(&self, status: ConnectionStatus, reason: ConnectionStatusChangeReason) {
        let handler = self.status_handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(status, reason).unwrap();
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn send_result(&self) -> CloudResult<()> {
        match self.send_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CloudClient for RecordingClient {
    async fn get_twin(&self) -> CloudResult<Twin> {
        self.record(Call::GetTwin);
        Ok(self.twin.lock().unwrap().clone())
    }

    async fn send_event(&self, message: CloudMessage) -> CloudResult<()> {
        self.record(Call::SendEvent(message));
        self.send_result()
    }

    async fn send_event_batch(&self, messages: Vec<CloudMessage>) -> CloudResult<()> {
        self.record(Call::SendEventBatch(messages));
        self.send_result()
    }

    async fn update_reported_properties(&self, patch: TwinCollection) -> CloudResult<()> {
        self.record(Call::UpdateReported(patch));
        Ok(())
    }

    async fn complete(&self, message_id: &str) -> CloudResult<()> {
        self.record(Call::Complete(message_id.to_string()));
        Ok(())
    }

    async fn abandon(&self, message_id: &str) -> CloudResult<()> {
        self.record(Call::Abandon(message_id.to_string()));
        Ok(())
    }

    async fn reject(&self, message_id: &str) -> CloudResult<()> {
        self.record(Call::Reject(message_id.to_string()));
        Ok(())
    }

    async fn receive_message(&self, timeout: Duration) -> CloudResult<Option<CloudMessage>> {
        let mut inbox = self.inbox.lock().await;
        match tokio::time::timeout(timeout, inbox.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(CloudError::NotConnected),
            Err(_) => Ok(None),
        }
    }

    async fn set_method_handler(&self, handler: Option<MethodCallback>) -> CloudResult<()> {
        self.record(Call::SetMethodHandler(handler.is_some()));
        *self.method_handler.lock().unwrap() = handler;
        Ok(())
    }

    async fn set_desired_property_handler(
        &self,
        handler: Option<DesiredPropertyCallback>,
    ) -> CloudResult<()> {
        self.record(Call::SetDesiredHandler(handler.is_some()));
        *self.desired_handler.lock().unwrap() = handler;
        Ok(())
    }

    fn set_connection_status_changed_handler(&self, handler: ConnectionStatusHandler) {
        *self.status_handler.lock().unwrap() = Some(handler);
    }

    async fn close(&self) -> CloudResult<()> {
        self.record(Call::Close);
        let delay = *self.close_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.close_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Provider handing out a fresh recording client per call
#[derive(Default)]
pub struct RecordingProvider {
    created: Mutex<Vec<(Identity, Arc<RecordingClient>)>>,
}

impl RecordingProvider {
    pub fn created(&self) -> Vec<(Identity, Arc<RecordingClient>)> {
        self.created.lock().unwrap().clone()
    }

    pub fn last_client(&self) -> Arc<RecordingClient> {
        self.created.lock().unwrap().last().unwrap().1.clone()
    }
}

#[async_trait]
impl CloudClientProvider for RecordingProvider {
    async fn create(&self, identity: &Identity) -> CloudResult<Arc<dyn CloudClient>> {
        let client = RecordingClient::new();
        self.created
            .lock()
            .unwrap()
            .push((identity.clone(), Arc::clone(&client)));
        Ok(client as Arc<dyn CloudClient>)
    }
}

/// Local listener recording what the cloud pushed down
#[derive(Default)]
pub struct RecordingListener {
    pub messages: Mutex<Vec<Message>>,
    pub method_calls: Mutex<Vec<DirectMethodRequest>>,
    pub desired_updates: Mutex<Vec<Message>>,
}

impl RecordingListener {
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl CloudListener for RecordingListener {
    async fn process_message(&self, message: Message) -> CloudResult<()> {
        self.messages.lock().unwrap().push(message);
        Ok(())
    }

    async fn call_method(&self, request: DirectMethodRequest) -> DirectMethodResponse {
        let response = DirectMethodResponse::from_device(
            request.correlation_id.clone(),
            200,
            request.payload.clone(),
        );
        self.method_calls.lock().unwrap().push(request);
        response
    }

    async fn on_desired_property_update(&self, patch: Message) -> CloudResult<()> {
        self.desired_updates.lock().unwrap().push(patch);
        Ok(())
    }
}

/// How [`FakeLink::open`] behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    Accept,
    Reject,
    Hang,
}

/// In-memory link recording transfers and handing out disposition slots
pub struct FakeLink {
    settings: Mutex<LinkSettings>,
    opened_with: Mutex<Option<LinkSettings>>,
    open_behavior: OpenBehavior,
    pub waiting_sends: Mutex<Vec<AmqpMessage>>,
    pub no_wait_sends: Mutex<Vec<AmqpMessage>>,
    dispositions: Mutex<HashMap<Bytes, oneshot::Sender<Outcome>>>,
    registrations: AtomicUsize,
    closes: AtomicUsize,
    fail_no_wait: AtomicBool,
}

impl FakeLink {
    pub fn new(open_behavior: OpenBehavior) -> Arc<Self> {
        Arc::new(Self {
            settings: Mutex::new(LinkSettings {
                name: "c2d".to_string(),
                ..Default::default()
            }),
            opened_with: Mutex::new(None),
            open_behavior,
            waiting_sends: Mutex::new(Vec::new()),
            no_wait_sends: Mutex::new(Vec::new()),
            dispositions: Mutex::new(HashMap::new()),
            registrations: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            fail_no_wait: AtomicBool::new(false),
        })
    }

    pub fn opened_with(&self) -> Option<LinkSettings> {
        self.opened_with.lock().unwrap().clone()
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Make every `send_no_wait` fail, as a detached link would
    pub fn fail_no_wait_sends(&self) {
        self.fail_no_wait.store(true, Ordering::SeqCst);
    }

    /// Deliveries still waiting for an outcome
    pub fn pending_dispositions(&self) -> usize {
        self.dispositions.lock().unwrap().len()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Settle `tag` with `outcome`; false if nothing waits for it
    pub fn settle(&self, tag: &Bytes, outcome: Outcome) -> bool {
        match self.dispositions.lock().unwrap().remove(tag) {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Forget `tag` without an outcome, as a detached link would
    pub fn drop_delivery(&self, tag: &Bytes) {
        self.dispositions.lock().unwrap().remove(tag);
    }
}

#[async_trait]
impl AmqpLink for FakeLink {
    fn settings(&self) -> LinkSettings {
        self.settings.lock().unwrap().clone()
    }

    fn set_settings(&self, settings: LinkSettings) {
        *self.settings.lock().unwrap() = settings;
    }

    async fn open(&self, _timeout: Duration) -> CloudResult<()> {
        match self.open_behavior {
            OpenBehavior::Accept => {
                *self.opened_with.lock().unwrap() = Some(self.settings());
                Ok(())
            }
            OpenBehavior::Reject => Err(CloudError::LinkNegotiationRejected {
                reason: "settle mode not supported".to_string(),
            }),
            OpenBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn close(&self) -> CloudResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn send_no_wait(&self, message: AmqpMessage) -> CloudResult<()> {
        if self.fail_no_wait.load(Ordering::SeqCst) {
            self.dispositions.lock().unwrap().remove(&message.delivery_tag);
            return Err(CloudError::Transport {
                reason: "link detached".to_string(),
            });
        }
        self.no_wait_sends.lock().unwrap().push(message);
        Ok(())
    }

    async fn send(&self, message: AmqpMessage) -> CloudResult<()> {
        self.waiting_sends.lock().unwrap().push(message);
        Ok(())
    }

    fn register_disposition(&self, tag: Bytes) -> oneshot::Receiver<Outcome> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.dispositions.lock().unwrap().insert(tag, tx);
        rx
    }
}
