use async_trait::async_trait;
use edge_bridge_core::{CloudProxy, CloudSessionProxy};
use edge_bridge_sdk::{
    CloudListener, CloudResult, DirectMethodRequest, DirectMethodResponse, FeedbackStatus, Message,
};
use std::sync::Weak;
use tracing::{debug, info};

/// Listener used when no local session is attached: logs what the cloud
/// pushes down and completes cloud-to-device messages.
pub struct LoggingListener {
    proxy: Weak<CloudSessionProxy>,
}

impl LoggingListener {
    pub fn new(proxy: Weak<CloudSessionProxy>) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl CloudListener for LoggingListener {
    async fn process_message(&self, message: Message) -> CloudResult<()> {
        info!(
            message_id = ?message.message_id(),
            body_len = message.body.len(),
            properties = message.properties.len(),
            "Cloud-to-device message"
        );
        let (Some(proxy), Some(lock_token)) = (self.proxy.upgrade(), message.lock_token()) else {
            return Ok(());
        };
        proxy.send_feedback(lock_token, FeedbackStatus::Complete).await
    }

    async fn call_method(&self, request: DirectMethodRequest) -> DirectMethodResponse {
        info!(
            target_id = %request.target_id,
            method = %request.method_name,
            "Direct method call without a local session"
        );
        DirectMethodResponse::from_error(
            request.correlation_id,
            404,
            format!("no local session for '{}'", request.target_id),
        )
    }

    async fn on_desired_property_update(&self, patch: Message) -> CloudResult<()> {
        debug!(
            version = ?patch.system_property(edge_bridge_sdk::system_property::VERSION),
            patch = %String::from_utf8_lossy(&patch.body),
            "Desired property update"
        );
        Ok(())
    }
}
