pub(crate) mod model;
pub(crate) mod types;

use crate::{CloudResult, Identity, Message};
use async_trait::async_trait;
use model::{
    CloudMessage, DirectMethodRequest, DirectMethodResponse, MethodRequest, MethodResponse, Twin,
    TwinCollection,
};
use std::{future::Future, pin::Pin, sync::Arc, time::Duration};
use types::{ConnectionStatus, ConnectionStatusChangeReason};

/// Boxed future returned by upstream callbacks
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Connection status callback.
///
/// Errors returned by the handler are logged by the caller and never
/// propagated further.
pub type ConnectionStatusHandler =
    Arc<dyn Fn(ConnectionStatus, ConnectionStatusChangeReason) -> CloudResult<()> + Send + Sync>;

/// Direct method callback installed on an upstream client
pub type MethodCallback = Arc<dyn Fn(MethodRequest) -> BoxFuture<MethodResponse> + Send + Sync>;

/// Desired property patch callback installed on an upstream client
pub type DesiredPropertyCallback =
    Arc<dyn Fn(TwinCollection) -> BoxFuture<CloudResult<()>> + Send + Sync>;

/// Upstream cloud client for one identity.
///
/// Implementations are expected to be safe to share between tasks; the
/// bridge never serializes calls on its side.
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Fetch the full twin document
    async fn get_twin(&self) -> CloudResult<Twin>;

    /// Send one device-to-cloud message
    async fn send_event(&self, message: CloudMessage) -> CloudResult<()>;

    /// Send several device-to-cloud messages in order
    async fn send_event_batch(&self, messages: Vec<CloudMessage>) -> CloudResult<()>;

    /// Apply a partial update to the reported properties
    async fn update_reported_properties(&self, patch: TwinCollection) -> CloudResult<()>;

    /// Acknowledge a cloud-to-device message as processed
    async fn complete(&self, message_id: &str) -> CloudResult<()>;

    /// Return a cloud-to-device message to the queue
    async fn abandon(&self, message_id: &str) -> CloudResult<()>;

    /// Dead-letter a cloud-to-device message
    async fn reject(&self, message_id: &str) -> CloudResult<()>;

    /// Wait up to `timeout` for the next cloud-to-device message.
    ///
    /// `Ok(None)` means no message arrived in time.
    async fn receive_message(&self, timeout: Duration) -> CloudResult<Option<CloudMessage>>;

    /// Install (`Some`) or clear (`None`) the direct method callback
    async fn set_method_handler(&self, handler: Option<MethodCallback>) -> CloudResult<()>;

    /// Install (`Some`) or clear (`None`) the desired property callback
    async fn set_desired_property_handler(
        &self,
        handler: Option<DesiredPropertyCallback>,
    ) -> CloudResult<()>;

    /// Replace the connection status callback
    fn set_connection_status_changed_handler(&self, handler: ConnectionStatusHandler);

    /// Close the upstream connection
    async fn close(&self) -> CloudResult<()>;
}

/// Creates upstream clients on demand, one per identity
#[async_trait]
pub trait CloudClientProvider: Send + Sync {
    async fn create(&self, identity: &Identity) -> CloudResult<Arc<dyn CloudClient>>;
}

/// Local side of a cloud session: receives what the cloud pushes down
#[async_trait]
pub trait CloudListener: Send + Sync {
    /// Deliver a cloud-to-device message to the local session
    async fn process_message(&self, message: Message) -> CloudResult<()>;

    /// Invoke a direct method on the local device/module
    async fn call_method(&self, request: DirectMethodRequest) -> DirectMethodResponse;

    /// Deliver a desired property patch to the local session
    async fn on_desired_property_update(&self, patch: Message) -> CloudResult<()>;
}
