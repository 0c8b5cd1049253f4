//! Handlers for publishes the hub sends to a device or module session.

use super::{
    supervisor::SharedClient,
    topics::{self, Topics},
};
use arc_swap::ArcSwapOption;
use bytes::Bytes;
use dashmap::DashMap;
use edge_bridge_sdk::{
    mqtt::router::HandlerResult, CloudError, CloudMessage, DesiredPropertyCallback, Identity,
    MethodCallback, MethodRequest, MethodResponse, TwinCollection,
};
use rumqttc::QoS;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Status answered when no method callback is installed
const METHOD_NOT_IMPLEMENTED: i32 = 501;

/// Answer to a twin GET or reported-properties PATCH
#[derive(Debug)]
pub(super) struct TwinReply {
    pub status: u16,
    pub version: Option<i64>,
    pub body: Bytes,
}

/// Outstanding twin requests keyed by `$rid`
pub(super) type PendingRequests = DashMap<String, oneshot::Sender<TwinReply>>;

/// Callbacks installed through the upstream client contract
#[derive(Default)]
pub(super) struct Callbacks {
    pub method: ArcSwapOption<MethodCallback>,
    pub desired: ArcSwapOption<DesiredPropertyCallback>,
}

/// Handle a twin response
///
/// Topic: `$iothub/twin/res/{status}/?$rid={rid}`
pub async fn handle_twin_response(
    topic: &str,
    payload: Bytes,
    pending: &PendingRequests,
) -> HandlerResult {
    let parsed = topics::parse_twin_response(topic).ok_or_else(|| invalid_topic(topic))?;

    match pending.remove(&parsed.rid) {
        Some((_, tx)) => {
            let _ = tx.send(TwinReply {
                status: parsed.status,
                version: parsed.version,
                body: payload,
            });
        }
        None => debug!(rid = %parsed.rid, "Twin response without pending request"),
    }
    Ok(())
}

/// Handle a desired property patch
///
/// Topic: `$iothub/twin/PATCH/properties/desired/?$version={version}`
pub async fn handle_desired_patch(
    topic: &str,
    payload: Bytes,
    identity: &Identity,
    callbacks: &Callbacks,
) -> HandlerResult {
    let mut patch: Map<String, Value> =
        serde_json::from_slice(&payload).map_err(|e| CloudError::InvalidMessageFormat {
            reason: format!("Failed to parse desired property patch: {e}"),
        })?;
    if let Some(version) = topics::parse_desired_version(topic) {
        patch
            .entry(TwinCollection::VERSION_KEY)
            .or_insert(Value::from(version));
    }

    let Some(callback) = callbacks.desired.load_full() else {
        debug!(identity = %identity, "No desired property callback, dropping patch");
        return Ok(());
    };

    let identity = identity.clone();
    tokio::spawn(async move {
        if let Err(e) = callback(TwinCollection(patch)).await {
            warn!(identity = %identity, error = %e, "Desired property callback failed");
        }
    });
    Ok(())
}

/// Handle a direct method invocation
///
/// Topic: `$iothub/methods/POST/{name}/?$rid={rid}`
pub async fn handle_method_request(
    topic: &str,
    payload: Bytes,
    identity: &Identity,
    callbacks: &Callbacks,
    client: &SharedClient,
    qos: QoS,
) -> HandlerResult {
    let (name, rid) = topics::parse_method_request(topic).ok_or_else(|| invalid_topic(topic))?;
    debug!(identity = %identity, method = %name, %rid, "Direct method request");

    let callback = callbacks.method.load_full();
    let identity = identity.clone();
    let client = Arc::clone(client);
    tokio::spawn(async move {
        let response = match callback {
            Some(callback) => {
                callback(MethodRequest {
                    name,
                    request_id: rid.clone(),
                    payload,
                })
                .await
            }
            None => MethodResponse {
                status: METHOD_NOT_IMPLEMENTED,
                payload: Bytes::from(
                    json!({ "message": format!("method '{name}' is not implemented") })
                        .to_string(),
                ),
            },
        };

        let topic = Topics::method_response(response.status, &rid);
        if let Err(e) = client.publish(topic, qos, response.payload).await {
            warn!(identity = %identity, %rid, error = %e, "Failed to publish method response");
        }
    });
    Ok(())
}

/// Handle a cloud-to-device message
///
/// Topic: `devices/{device}/messages/devicebound/{property_bag}`
pub async fn handle_c2d_message(
    topic: &str,
    payload: Bytes,
    identity: &Identity,
    c2d_tx: &mpsc::Sender<CloudMessage>,
) -> HandlerResult {
    let message = topics::parse_c2d_message(topic, payload)?;

    match c2d_tx.try_send(message) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(message)) => {
            warn!(
                identity = %identity,
                message_id = ?message.message_id,
                "Cloud-to-device queue full, dropping message"
            );
            Ok(())
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(identity = %identity, "Cloud-to-device queue closed");
            Ok(())
        }
    }
}

#[inline]
fn invalid_topic(topic: &str) -> CloudError {
    CloudError::InvalidMessageFormat {
        reason: format!("unexpected topic '{topic}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::ClientEntry;
    use edge_bridge_sdk::{BoxFuture, CloudResult};
    use std::sync::Mutex;
    use std::time::Duration;

    fn identity() -> Identity {
        "dev1".parse().unwrap()
    }

    #[tokio::test]
    async fn twin_response_resolves_pending_request() {
        let pending = PendingRequests::new();
        let (tx, rx) = oneshot::channel();
        pending.insert("5".to_string(), tx);

        handle_twin_response(
            "$iothub/twin/res/204/?$rid=5&$version=9",
            Bytes::new(),
            &pending,
        )
        .await
        .unwrap();

        let reply = rx.await.unwrap();
        assert_eq!(reply.status, 204);
        assert_eq!(reply.version, Some(9));
        assert!(pending.is_empty());

        // unknown rids are ignored
        handle_twin_response("$iothub/twin/res/200/?$rid=6", Bytes::new(), &pending)
            .await
            .unwrap();
        assert!(handle_twin_response("$iothub/twin/res/x", Bytes::new(), &pending)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn desired_patch_carries_topic_version() {
        let callbacks = Callbacks::default();
        let (tx, mut rx) = mpsc::channel(1);
        let callback: DesiredPropertyCallback = Arc::new(move |patch: TwinCollection| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(patch).await;
                Ok(())
            }) as BoxFuture<CloudResult<()>>
        });
        callbacks.desired.store(Some(Arc::new(callback)));

        handle_desired_patch(
            "$iothub/twin/PATCH/properties/desired/?$version=3",
            Bytes::from_static(br#"{"interval":5}"#),
            &identity(),
            &callbacks,
        )
        .await
        .unwrap();

        let patch = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(patch.version(), Some(3));
        assert_eq!(patch.get("interval"), Some(&json!(5)));

        let err = handle_desired_patch(
            "$iothub/twin/PATCH/properties/desired/?$version=4",
            Bytes::from_static(b"[1]"),
            &identity(),
            &callbacks,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CloudError::InvalidMessageFormat { .. }));
    }

    #[tokio::test]
    async fn method_request_reaches_callback() {
        let callbacks = Callbacks::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let callback: MethodCallback = {
            let seen = Arc::clone(&seen);
            Arc::new(move |request: MethodRequest| {
                seen.lock().unwrap().push(request);
                Box::pin(async {
                    MethodResponse {
                        status: 200,
                        payload: Bytes::from_static(b"{}"),
                    }
                }) as BoxFuture<MethodResponse>
            })
        };
        callbacks.method.store(Some(Arc::new(callback)));
        let client = Arc::new(ClientEntry::new_empty());

        handle_method_request(
            "$iothub/methods/POST/reboot/?$rid=42",
            Bytes::from_static(b"{\"delay\":1}"),
            &identity(),
            &callbacks,
            &client,
            QoS::AtLeastOnce,
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].name, "reboot");
        assert_eq!(seen[0].request_id, "42");
    }

    #[tokio::test]
    async fn c2d_queue_overflow_drops_newest() {
        let (tx, mut rx) = mpsc::channel(1);
        let topic = "devices/dev1/messages/devicebound/%24.mid=a";

        handle_c2d_message(topic, Bytes::from_static(b"1"), &identity(), &tx)
            .await
            .unwrap();
        handle_c2d_message(topic, Bytes::from_static(b"2"), &identity(), &tx)
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.body, Bytes::from_static(b"1"));
        assert!(rx.try_recv().is_err());
    }
}
