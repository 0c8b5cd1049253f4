mod common;

use bytes::Bytes;
use common::{device, eventually, init_tracing, Call, RecordingClient, RecordingListener};
use edge_bridge_core::{default_converter_provider, CloudProxy, CloudReceiver, CloudSessionProxy};
use edge_bridge_sdk::{
    system_property, CloudError, CloudMessage, ConnectionStatus, ConnectionStatusChangeReason,
    ConnectionStatusHandler, FeedbackStatus, Message, MethodRequest, Twin, TwinCollection,
};
use serde_json::{json, Value};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

type Notifications = Arc<Mutex<Vec<(ConnectionStatus, ConnectionStatusChangeReason)>>>;

fn recording_handler() -> (ConnectionStatusHandler, Notifications) {
    let seen: Notifications = Arc::default();
    let sink = Arc::clone(&seen);
    let handler: ConnectionStatusHandler = Arc::new(move |status, reason| {
        sink.lock().unwrap().push((status, reason));
        Ok(())
    });
    (handler, seen)
}

fn proxy_for(client: &Arc<RecordingClient>) -> (Arc<CloudSessionProxy>, Notifications) {
    let (handler, seen) = recording_handler();
    let proxy = CloudSessionProxy::new(
        device("dev1"),
        Arc::clone(client) as _,
        default_converter_provider(),
        Some(handler),
    )
    .with_receive_timeout(Duration::from_millis(20));
    (Arc::new(proxy), seen)
}

fn unauthorized() -> CloudError {
    CloudError::Unauthorized {
        identity: "dev1".to_string(),
        reason: "SAS token expired".to_string(),
    }
}

#[tokio::test]
async fn concurrent_close_tears_down_once() {
    init_tracing();
    let client = RecordingClient::new();
    client.delay_close(Duration::from_millis(50));
    let (proxy, _) = proxy_for(&client);

    let (first, second) = tokio::join!(proxy.close(), proxy.close());

    assert!(first);
    assert!(second);
    assert_eq!(client.close_count(), 1);
    assert!(!proxy.is_active());
    assert!(proxy.close().await);
    assert_eq!(client.close_count(), 1);
}

#[tokio::test]
async fn failed_teardown_returns_false_and_stays_closed() {
    let client = RecordingClient::new();
    client.fail_close_with(CloudError::Transport {
        reason: "socket reset".to_string(),
    });
    let (proxy, _) = proxy_for(&client);

    assert!(!proxy.close().await);
    assert!(!proxy.is_active());
    // later calls find it already closed
    assert!(proxy.close().await);
}

#[tokio::test]
async fn closed_proxy_rejects_operations() {
    let client = RecordingClient::new();
    let (proxy, _) = proxy_for(&client);
    assert!(proxy.close().await);

    let err = proxy.send_message(Message::new("late")).await.unwrap_err();
    assert!(matches!(err, CloudError::SessionClosed { .. }));
    assert!(matches!(
        proxy.get_twin().await,
        Err(CloudError::SessionClosed { .. })
    ));
    assert!(matches!(
        proxy.bind_receiver(Arc::new(RecordingListener::default())).await,
        Err(CloudError::SessionClosed { .. })
    ));
    assert_eq!(client.count(|c| matches!(c, Call::SendEvent(_))), 0);
}

#[tokio::test]
async fn send_converts_system_properties() {
    let client = RecordingClient::new();
    let (proxy, _) = proxy_for(&client);

    let message = Message::new("temp=21")
        .with_property("kind", "telemetry")
        .with_system_property(system_property::MESSAGE_ID, "m-1")
        .with_system_property(system_property::CONTENT_TYPE, "text/plain");
    proxy.send_message(message).await.unwrap();

    let sent = match client.calls().as_slice() {
        [Call::SendEvent(sent)] => sent.clone(),
        other => panic!("unexpected calls: {other:?}"),
    };
    assert_eq!(sent.body, Bytes::from_static(b"temp=21"));
    assert_eq!(sent.message_id.as_deref(), Some("m-1"));
    assert_eq!(sent.content_type.as_deref(), Some("text/plain"));
    assert_eq!(sent.properties.get("kind").map(String::as_str), Some("telemetry"));
}

#[tokio::test]
async fn credential_expiry_closes_and_notifies_once() {
    let client = RecordingClient::new();
    client.fail_sends_with(unauthorized());
    let (proxy, seen) = proxy_for(&client);

    let err = proxy.send_message(Message::new("x")).await.unwrap_err();

    assert_eq!(err, unauthorized());
    assert!(!proxy.is_active());
    assert_eq!(client.close_count(), 1);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(
            ConnectionStatus::Disconnected,
            ConnectionStatusChangeReason::ExpiredCredential
        )]
    );
}

#[tokio::test]
async fn http_401_counts_as_credential_failure_for_batches() {
    let client = RecordingClient::new();
    client.fail_sends_with(CloudError::RequestFailed {
        status: 401,
        reason: "unauthorized".to_string(),
    });
    let (proxy, seen) = proxy_for(&client);

    let result = proxy
        .send_message_batch(vec![Message::new("a"), Message::new("b")])
        .await;

    assert!(matches!(result, Err(CloudError::RequestFailed { status: 401, .. })));
    assert!(!proxy.is_active());
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_credential_failures_notify_once() {
    let client = RecordingClient::new();
    client.fail_sends_with(unauthorized());
    client.delay_close(Duration::from_millis(20));
    let (proxy, seen) = proxy_for(&client);

    let (a, b) = tokio::join!(
        proxy.send_message(Message::new("a")),
        proxy.send_message(Message::new("b"))
    );

    assert!(a.is_err());
    assert!(b.is_err());
    assert_eq!(client.close_count(), 1);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn transient_errors_keep_session_active() {
    let client = RecordingClient::new();
    client.fail_sends_with(CloudError::Transport {
        reason: "connection reset".to_string(),
    });
    let (proxy, seen) = proxy_for(&client);

    let err = proxy.send_message(Message::new("x")).await.unwrap_err();

    assert!(matches!(err, CloudError::Transport { .. }));
    assert!(proxy.is_active());
    assert_eq!(client.close_count(), 0);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failing_status_handler_keeps_original_error() {
    let client = RecordingClient::new();
    client.fail_sends_with(unauthorized());
    let handler: ConnectionStatusHandler = Arc::new(|_, _| {
        Err(CloudError::RuntimeError {
            reason: "listener gone".to_string(),
        })
    });
    let proxy = CloudSessionProxy::new(
        device("dev1"),
        Arc::clone(&client) as _,
        default_converter_provider(),
        Some(handler),
    );

    let err = proxy.send_message(Message::new("x")).await.unwrap_err();

    assert_eq!(err, unauthorized());
    assert!(!proxy.is_active());
}

#[tokio::test]
async fn batch_conversion_fails_before_network() {
    let client = RecordingClient::new();
    let (proxy, _) = proxy_for(&client);

    let bad = Message::new("b").with_system_property(system_property::ENQUEUED_TIME, "not-a-time");
    let err = proxy
        .send_message_batch(vec![Message::new("a"), bad])
        .await
        .unwrap_err();

    assert!(matches!(err, CloudError::InvalidMessageFormat { .. }));
    assert!(client.calls().is_empty());
    assert!(proxy.is_active());
}

#[tokio::test]
async fn blank_feedback_id_never_reaches_upstream() {
    let client = RecordingClient::new();
    let (proxy, _) = proxy_for(&client);

    for id in ["", "   ", "\t"] {
        let err = proxy
            .send_feedback(id, FeedbackStatus::Complete)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::InvalidArgument { .. }));
    }
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn feedback_dispatches_by_status() {
    let client = RecordingClient::new();
    let (proxy, _) = proxy_for(&client);

    proxy.send_feedback("t1", FeedbackStatus::Complete).await.unwrap();
    proxy.send_feedback("t2", FeedbackStatus::Abandon).await.unwrap();
    proxy.send_feedback("t3", FeedbackStatus::Reject).await.unwrap();

    assert_eq!(
        client.calls(),
        vec![
            Call::Complete("t1".to_string()),
            Call::Abandon("t2".to_string()),
            Call::Reject("t3".to_string()),
        ]
    );
}

#[tokio::test]
async fn reported_properties_require_json_object() {
    let client = RecordingClient::new();
    let (proxy, _) = proxy_for(&client);

    let err = proxy
        .update_reported_properties(Message::new("42"))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::InvalidMessageFormat { .. }));

    proxy
        .update_reported_properties(Message::new(r#"{"fw":"2.0"}"#))
        .await
        .unwrap();
    match client.calls().as_slice() {
        [Call::UpdateReported(patch)] => assert_eq!(patch.get("fw"), Some(&json!("2.0"))),
        other => panic!("unexpected calls: {other:?}"),
    }
}

#[tokio::test]
async fn get_twin_returns_json_document() {
    let client = RecordingClient::new();
    client.set_twin(
        serde_json::from_value::<Twin>(json!({
            "desired": { "interval": 30, "$version": 2 },
            "reported": { "$version": 5 }
        }))
        .unwrap(),
    );
    let (proxy, _) = proxy_for(&client);

    let message = proxy.get_twin().await.unwrap();

    let body: Value = serde_json::from_slice(&message.body).unwrap();
    assert_eq!(body["desired"]["interval"], json!(30));
    assert_eq!(message.system_property(system_property::VERSION), Some("5"));
}

#[tokio::test]
async fn receiver_operations_need_a_bound_receiver() {
    let client = RecordingClient::new();
    let (proxy, _) = proxy_for(&client);

    assert!(matches!(
        proxy.setup_call_method().await,
        Err(CloudError::ReceiverNotBound { .. })
    ));
    assert!(matches!(
        proxy.start_listening().await,
        Err(CloudError::ReceiverNotBound { .. })
    ));
}

#[tokio::test]
async fn c2d_messages_reach_the_listener() {
    init_tracing();
    let client = RecordingClient::new();
    let (proxy, _) = proxy_for(&client);
    let listener = Arc::new(RecordingListener::default());
    proxy.bind_receiver(listener.clone()).await.unwrap();

    proxy.start_listening().await.unwrap();
    // second start is a no-op
    proxy.start_listening().await.unwrap();
    client.push_c2d(CloudMessage {
        body: Bytes::from_static(b"reboot"),
        lock_token: Some("5d0c8a9e-2f39-4ef2-bb57-4a3a5c7de001".to_string()),
        ..Default::default()
    });

    assert!(eventually(Duration::from_secs(2), || listener.messages().len() == 1).await);
    let received = listener.messages().remove(0);
    assert_eq!(received.body, Bytes::from_static(b"reboot"));
    assert_eq!(
        received.lock_token(),
        Some("5d0c8a9e-2f39-4ef2-bb57-4a3a5c7de001")
    );
    assert!(proxy.close().await);
}

#[tokio::test]
async fn method_requests_are_forwarded_to_the_listener() {
    let client = RecordingClient::new();
    let (proxy, _) = proxy_for(&client);
    let listener = Arc::new(RecordingListener::default());
    proxy.bind_receiver(listener.clone()).await.unwrap();

    proxy.setup_call_method().await.unwrap();
    let callback = client.method_handler().expect("method handler installed");
    let response = callback(MethodRequest {
        name: "reboot".to_string(),
        request_id: "42".to_string(),
        payload: Bytes::from_static(b"{\"delay\":5}"),
    })
    .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.payload, Bytes::from_static(b"{\"delay\":5}"));
    let calls = listener.method_calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method_name, "reboot");
    assert_eq!(calls[0].correlation_id, "42");
    assert_eq!(calls[0].target_id, "dev1");

    proxy.remove_call_method().await.unwrap();
    assert!(client.method_handler().is_none());
}

#[tokio::test]
async fn desired_property_patches_are_forwarded() {
    let client = RecordingClient::new();
    let (proxy, _) = proxy_for(&client);
    let listener = Arc::new(RecordingListener::default());
    proxy.bind_receiver(listener.clone()).await.unwrap();

    proxy.setup_desired_property_update().await.unwrap();
    let callback = client.desired_handler().expect("desired handler installed");
    let patch: TwinCollection =
        serde_json::from_value(json!({ "interval": 60, "$version": 9 })).unwrap();
    callback(patch).await.unwrap();

    let updates = listener.desired_updates.lock().unwrap().clone();
    assert_eq!(updates.len(), 1);
    let body: Value = serde_json::from_slice(&updates[0].body).unwrap();
    assert_eq!(body["interval"], json!(60));
    assert_eq!(updates[0].system_property(system_property::VERSION), Some("9"));
}

#[tokio::test]
async fn rebinding_closes_the_previous_receiver() {
    let client = RecordingClient::new();
    let (proxy, _) = proxy_for(&client);
    proxy
        .bind_receiver(Arc::new(RecordingListener::default()))
        .await
        .unwrap();
    proxy.setup_call_method().await.unwrap();

    proxy
        .bind_receiver(Arc::new(RecordingListener::default()))
        .await
        .unwrap();

    assert_eq!(
        client.calls(),
        vec![Call::SetMethodHandler(true), Call::SetMethodHandler(false)]
    );

    assert!(proxy.close().await);
    assert_eq!(client.calls().last(), Some(&Call::Close));
    assert_eq!(client.count(|c| *c == Call::SetMethodHandler(false)), 1);
}

#[tokio::test]
async fn close_clears_installed_callbacks() {
    let client = RecordingClient::new();
    let (proxy, _) = proxy_for(&client);
    proxy
        .bind_receiver(Arc::new(RecordingListener::default()))
        .await
        .unwrap();
    proxy.setup_call_method().await.unwrap();
    proxy.setup_desired_property_update().await.unwrap();

    assert!(proxy.close().await);

    assert!(client.method_handler().is_none());
    assert!(client.desired_handler().is_none());
    assert_eq!(client.close_count(), 1);
}

#[tokio::test]
async fn closed_receiver_installs_no_callbacks() {
    let client = RecordingClient::new();
    let receiver = CloudReceiver::new(
        device("dev1"),
        Arc::clone(&client) as _,
        default_converter_provider(),
        Arc::new(RecordingListener::default()),
    );
    receiver.close().await.unwrap();

    assert!(matches!(
        receiver.setup_call_method().await,
        Err(CloudError::SessionClosed { .. })
    ));
    assert!(matches!(
        receiver.setup_desired_property_update().await,
        Err(CloudError::SessionClosed { .. })
    ));
    assert!(matches!(
        receiver.start_listening(),
        Err(CloudError::SessionClosed { .. })
    ));
    assert!(client.method_handler().is_none());
    assert!(client.desired_handler().is_none());
    assert!(client.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn setup_racing_a_rebind_leaves_no_stale_callback() {
    for _ in 0..50 {
        let client = RecordingClient::new();
        let (proxy, _) = proxy_for(&client);
        proxy
            .bind_receiver(Arc::new(RecordingListener::default()))
            .await
            .unwrap();

        let (setup, rebind) = tokio::join!(
            proxy.setup_call_method(),
            proxy.bind_receiver(Arc::new(RecordingListener::default())),
        );
        rebind.unwrap();
        assert!(matches!(setup, Ok(()) | Err(CloudError::SessionClosed { .. })));

        assert!(proxy.close().await);
        assert!(client.method_handler().is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bind_racing_close_leaves_nothing_bound() {
    for _ in 0..50 {
        let client = RecordingClient::new();
        let (proxy, _) = proxy_for(&client);
        proxy
            .bind_receiver(Arc::new(RecordingListener::default()))
            .await
            .unwrap();
        proxy.setup_desired_property_update().await.unwrap();

        let (bound, closed) = tokio::join!(
            proxy.bind_receiver(Arc::new(RecordingListener::default())),
            proxy.close(),
        );

        assert!(closed);
        assert!(matches!(bound, Ok(()) | Err(CloudError::SessionClosed { .. })));
        assert!(!proxy.is_active());
        assert!(client.desired_handler().is_none());
        assert!(matches!(
            proxy.start_listening().await,
            Err(CloudError::SessionClosed { .. })
        ));
        assert_eq!(client.close_count(), 1);
    }
}
