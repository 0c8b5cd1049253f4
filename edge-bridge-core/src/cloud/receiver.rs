use super::DEFAULT_RECEIVE_TIMEOUT;
use bytes::Bytes;
use edge_bridge_sdk::{
    BoxFuture, CloudClient, CloudError, CloudListener, CloudMessage, CloudResult,
    DesiredPropertyCallback, DirectMethodRequest, DirectMethodResponse, Identity, MethodCallback,
    MethodRequest, MethodResponse, MessageConverterProvider, TwinCollection,
};
use serde_json::json;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause after a transient receive failure before polling again
const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Inbound half of a cloud session.
///
/// Pulls cloud-to-device messages from the upstream client and installs
/// the method and desired property callbacks, handing everything to the
/// bound [`CloudListener`].
pub struct CloudReceiver {
    identity: Identity,
    client: Arc<dyn CloudClient>,
    converters: MessageConverterProvider,
    listener: Arc<dyn CloudListener>,
    receive_timeout: Duration,
    cancel: CancellationToken,
    listening: Arc<AtomicBool>,
    method_handler_set: AtomicBool,
    desired_handler_set: AtomicBool,
}

impl CloudReceiver {
    pub fn new(
        identity: Identity,
        client: Arc<dyn CloudClient>,
        converters: MessageConverterProvider,
        listener: Arc<dyn CloudListener>,
    ) -> Self {
        Self {
            identity,
            client,
            converters,
            listener,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            cancel: CancellationToken::new(),
            listening: Arc::new(AtomicBool::new(false)),
            method_handler_set: AtomicBool::new(false),
            desired_handler_set: AtomicBool::new(false),
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    #[inline]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Start the cloud-to-device receive loop; no-op while one is running
    pub fn start_listening(&self) -> CloudResult<()> {
        self.ensure_open()?;
        if self.listening.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let identity = self.identity.clone();
        let client = Arc::clone(&self.client);
        let converters = self.converters.clone();
        let listener = Arc::clone(&self.listener);
        let timeout = self.receive_timeout;
        let cancel = self.cancel.clone();
        let listening = Arc::clone(&self.listening);

        tokio::spawn(async move {
            info!(%identity, "Cloud-to-device receive loop started");
            loop {
                let received = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = client.receive_message(timeout) => received,
                };

                match received {
                    Ok(Some(cloud_message)) => {
                        let message = match converters.get::<CloudMessage>().to_message(&cloud_message) {
                            Ok(message) => message,
                            Err(e) => {
                                warn!(%identity, error = %e, "Dropping undecodable cloud-to-device message");
                                continue;
                            }
                        };
                        if let Err(e) = listener.process_message(message).await {
                            warn!(%identity, error = %e, "Listener failed to process cloud-to-device message");
                        }
                    }
                    Ok(None) => {}
                    Err(e) if e.is_transient() => {
                        debug!(%identity, error = %e, "Transient receive failure");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(RECEIVE_RETRY_DELAY) => {}
                        }
                    }
                    Err(e) => {
                        warn!(%identity, error = %e, "Stopping cloud-to-device receive loop");
                        break;
                    }
                }
            }
            listening.store(false, Ordering::Release);
            info!(%identity, "Cloud-to-device receive loop stopped");
        });
        Ok(())
    }

    fn ensure_open(&self) -> CloudResult<()> {
        if self.cancel.is_cancelled() {
            Err(CloudError::SessionClosed {
                identity: self.identity.to_string(),
            })
        } else {
            Ok(())
        }
    }

    pub async fn setup_call_method(&self) -> CloudResult<()> {
        self.ensure_open()?;
        let listener = Arc::clone(&self.listener);
        let target_id = self.identity.to_string();
        let callback: MethodCallback = Arc::new(move |request: MethodRequest| {
            let listener = Arc::clone(&listener);
            let target_id = target_id.clone();
            Box::pin(async move {
                let direct = DirectMethodRequest::new(
                    request.request_id,
                    target_id,
                    request.name,
                    request.payload,
                );
                method_response(listener.call_method(direct).await)
            }) as BoxFuture<MethodResponse>
        });

        self.client.set_method_handler(Some(callback)).await?;
        self.method_handler_set.store(true, Ordering::Release);
        // close() may have run while the handler was being installed
        if self.cancel.is_cancelled() {
            if self.method_handler_set.swap(false, Ordering::AcqRel) {
                self.client.set_method_handler(None).await?;
            }
            return self.ensure_open();
        }
        debug!(identity = %self.identity, "Method handler installed");
        Ok(())
    }

    pub async fn remove_call_method(&self) -> CloudResult<()> {
        self.client.set_method_handler(None).await?;
        self.method_handler_set.store(false, Ordering::Release);
        debug!(identity = %self.identity, "Method handler removed");
        Ok(())
    }

    pub async fn setup_desired_property_update(&self) -> CloudResult<()> {
        self.ensure_open()?;
        let listener = Arc::clone(&self.listener);
        let converters = self.converters.clone();
        let callback: DesiredPropertyCallback = Arc::new(move |patch: TwinCollection| {
            let listener = Arc::clone(&listener);
            let message = converters.get::<TwinCollection>().to_message(&patch);
            Box::pin(async move { listener.on_desired_property_update(message?).await })
                as BoxFuture<CloudResult<()>>
        });

        self.client.set_desired_property_handler(Some(callback)).await?;
        self.desired_handler_set.store(true, Ordering::Release);
        if self.cancel.is_cancelled() {
            if self.desired_handler_set.swap(false, Ordering::AcqRel) {
                self.client.set_desired_property_handler(None).await?;
            }
            return self.ensure_open();
        }
        debug!(identity = %self.identity, "Desired property handler installed");
        Ok(())
    }

    pub async fn remove_desired_property_update(&self) -> CloudResult<()> {
        self.client.set_desired_property_handler(None).await?;
        self.desired_handler_set.store(false, Ordering::Release);
        debug!(identity = %self.identity, "Desired property handler removed");
        Ok(())
    }

    /// Stop the receive loop and clear the callbacks this receiver installed.
    ///
    /// Every step is attempted; the first failure is returned.
    pub async fn close(&self) -> CloudResult<()> {
        self.cancel.cancel();

        let mut result = Ok(());
        if self.method_handler_set.swap(false, Ordering::AcqRel) {
            result = result.and(self.client.set_method_handler(None).await);
        }
        if self.desired_handler_set.swap(false, Ordering::AcqRel) {
            result = result.and(self.client.set_desired_property_handler(None).await);
        }
        debug!(identity = %self.identity, "Cloud receiver closed");
        result
    }
}

/// Device answers pass through; bridge-side failures are reported with the
/// HTTP status and a JSON error body.
fn method_response(response: DirectMethodResponse) -> MethodResponse {
    match response.error {
        None => MethodResponse {
            status: response.status,
            payload: response.data,
        },
        Some(error) => MethodResponse {
            status: i32::from(response.http_status_code),
            payload: serde_json::to_vec(&json!({ "message": error }))
                .map(Bytes::from)
                .unwrap_or_default(),
        },
    }
}
