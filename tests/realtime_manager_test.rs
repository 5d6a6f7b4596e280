//! Realtime connection manager against the in-memory transport.
//!
//! All tests run on a paused clock, so heartbeats, handshake timeouts and
//! reconnect delays elapse instantly once every task is idle.

mod common;

use common::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use hublink::adapters::mock::{MockHttpClient, MockRealtimeTransport, MockSocketHandle};
use hublink::error::{AuthError, TransportError};
use hublink::models::UpdateSource;
use hublink::realtime::{ConnectOptions, RealtimeConnectionManager, SubscriptionState};
use hublink::traits::SocketEvent;

async fn manager(transport: &MockRealtimeTransport) -> RealtimeConnectionManager {
    let session = mock_session(Arc::new(MockHttpClient::new()), Some(fresh_triple())).await;
    let config = test_config(MOCK_API_URL, MOCK_IDENTITY_URL);
    RealtimeConnectionManager::new(Arc::new(transport.clone()), session, &config)
}

fn subscription_id(socket: &MockSocketHandle) -> String {
    socket.sent_of_type("start")[0]["id"]
        .as_str()
        .unwrap()
        .to_string()
}

fn data_frame(id: &str, value: i64) -> Value {
    json!({
        "type": "data",
        "id": id,
        "payload": { "data": { "onDeviceUpdate": { "deviceId": "dev-1", "value": value } } }
    })
}

// ============================================================================
// Connect and deliver
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_subscribes_and_delivers_matching_data() {
    let transport = MockRealtimeTransport::new();
    let manager = manager(&transport).await;
    let (callback, received) = recording_callback();

    let state = manager
        .connect("dev-1", ConnectOptions::new().with_callback(callback))
        .await
        .unwrap();
    assert_eq!(*state.borrow(), SubscriptionState::Subscribed);
    assert!(manager.is_connected("dev-1"));
    assert_eq!(manager.device_ids(), vec!["dev-1".to_string()]);

    let socket = transport.wait_for_socket(1).await;
    assert!(socket.url().starts_with(MOCK_REALTIME_URL));
    assert!(socket.url().contains("header="));
    assert!(socket.url().ends_with("payload=e30%3D"));
    assert_eq!(socket.sent_types(), vec!["connection_init", "start"]);

    let start = &socket.sent_of_type("start")[0];
    let data: Value = serde_json::from_str(start["payload"]["data"].as_str().unwrap()).unwrap();
    assert_eq!(data["variables"]["deviceId"], "dev-1");
    let authorization = &start["payload"]["extensions"]["authorization"];
    assert_eq!(authorization["host"], "api.test");
    assert!(authorization["Authorization"].as_str().is_some_and(|t| !t.is_empty()));

    let id = subscription_id(&socket);
    socket.push_frame(data_frame(&id, 1));
    socket.push_frame(data_frame("someone-else", 2));
    settle().await;

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].device_id, "dev-1");
    assert_eq!(received[0].source, UpdateSource::Realtime);
    assert_eq!(received[0].payload["data"]["onDeviceUpdate"]["value"], 1);
    assert!(manager.last_message_at("dev-1").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_updates_are_broadcast() {
    let transport = MockRealtimeTransport::new();
    let manager = manager(&transport).await;
    let mut updates = manager.subscribe_updates();

    manager.connect("dev-1", ConnectOptions::new()).await.unwrap();
    let socket = transport.wait_for_socket(1).await;
    socket.push_frame(data_frame(&subscription_id(&socket), 7));

    let update = updates.recv().await.unwrap();
    assert_eq!(update.device_id, "dev-1");
    assert_eq!(update.payload["data"]["onDeviceUpdate"]["value"], 7);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_share_one_socket() {
    let transport = MockRealtimeTransport::new();
    let manager = manager(&transport).await;

    let (a, b) = tokio::join!(
        manager.connect("dev-1", ConnectOptions::new()),
        manager.connect("dev-1", ConnectOptions::new()),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
    manager.connect("dev-1", ConnectOptions::new()).await.unwrap();

    assert_eq!(transport.open_attempts(), 1);
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_data_before_ack_is_not_delivered() {
    let transport = MockRealtimeTransport::new();
    transport.set_manual_handshake(true);
    let manager = manager(&transport).await;
    let (callback, received) = recording_callback();

    let connecting = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .connect("dev-1", ConnectOptions::new().with_callback(callback))
                .await
        })
    };

    let socket = transport.wait_for_socket(1).await;
    socket.wait_for_sent("connection_init").await;
    socket.push_frame(data_frame("early", 1));
    socket.push_frame(json!({ "type": "connection_ack" }));
    let start = socket.wait_for_sent("start").await;
    connecting.await.unwrap().unwrap();
    settle().await;
    assert!(received.lock().unwrap().is_empty());

    let id = start["id"].as_str().unwrap();
    socket.push_frame(data_frame(id, 2));
    settle().await;
    assert_eq!(received.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_ack_times_out_and_removes_record() {
    let transport = MockRealtimeTransport::new();
    transport.set_manual_handshake(true);
    let manager = manager(&transport).await;

    let err = manager
        .connect("dev-1", ConnectOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::HandshakeTimeout(_)));
    assert_eq!(manager.state("dev-1"), SubscriptionState::Disconnected);
    assert!(manager.device_ids().is_empty());
    assert!(transport.sockets()[0].is_closed());

    // A failed first connect is not retried in the background.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.open_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_error_rejects_connect() {
    let transport = MockRealtimeTransport::new();
    transport.set_manual_handshake(true);
    transport.script_next_socket(vec![SocketEvent::Text(
        json!({
            "type": "connection_error",
            "payload": { "errors": [{ "errorType": "UnauthorizedException", "message": "denied" }] }
        })
        .to_string(),
    )]);
    let manager = manager(&transport).await;

    let err = manager
        .connect("dev-1", ConnectOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::ConnectionRejected(_)));
    assert!(manager.device_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_signed_out_session_opens_no_socket() {
    let transport = MockRealtimeTransport::new();
    let session = mock_session(Arc::new(MockHttpClient::new()), None).await;
    let config = test_config(MOCK_API_URL, MOCK_IDENTITY_URL);
    let manager = RealtimeConnectionManager::new(Arc::new(transport.clone()), session, &config);

    let err = manager
        .connect("dev-1", ConnectOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Auth(AuthError::NotAuthenticated)));
    assert_eq!(transport.open_attempts(), 0);
}

// ============================================================================
// Subscription health
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_error_frame_degrades_until_next_data() {
    let transport = MockRealtimeTransport::new();
    let manager = manager(&transport).await;
    let (callback, received) = recording_callback();
    manager
        .connect("dev-1", ConnectOptions::new().with_callback(callback))
        .await
        .unwrap();
    let socket = transport.wait_for_socket(1).await;
    let id = subscription_id(&socket);

    socket.push_frame(json!({
        "type": "error",
        "id": id,
        "payload": { "errors": [{ "message": "resolver failed" }] }
    }));
    settle().await;
    assert_eq!(manager.state("dev-1"), SubscriptionState::Degraded);
    assert!(manager.is_connected("dev-1"));

    socket.push_frame(data_frame(&id, 3));
    settle().await;
    assert_eq!(manager.state("dev-1"), SubscriptionState::Subscribed);
    assert_eq!(received.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_socket_is_closed_and_reconnected_once() {
    let transport = MockRealtimeTransport::new();
    let manager = manager(&transport).await;
    manager.connect("dev-1", ConnectOptions::new()).await.unwrap();

    // Ticks at 45s and 90s see at most 90s of silence; the 135s tick closes.
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(transport.socket_count(), 1);
    assert!(!transport.sockets()[0].is_closed());

    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(transport.socket_count(), 2);
    let sockets = transport.sockets();
    let first = &sockets[0];
    assert!(first.is_closed());
    assert_eq!(first.sent_of_type("stop").len(), 1);
    assert_eq!(manager.state("dev-1"), SubscriptionState::Subscribed);
    assert_eq!(manager.reconnect_attempts("dev-1"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_keepalives_prevent_idle_close() {
    let transport = MockRealtimeTransport::new();
    let manager = manager(&transport).await;
    manager.connect("dev-1", ConnectOptions::new()).await.unwrap();
    let socket = transport.wait_for_socket(1).await;

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(60)).await;
        socket.push_frame(json!({ "type": "ka" }));
        settle().await;
    }

    assert_eq!(transport.socket_count(), 1);
    assert!(manager.is_connected("dev-1"));
}

#[tokio::test(start_paused = true)]
async fn test_transport_pings_prevent_idle_close() {
    let transport = MockRealtimeTransport::new();
    let manager = manager(&transport).await;
    manager.connect("dev-1", ConnectOptions::new()).await.unwrap();
    let socket = transport.wait_for_socket(1).await;

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(60)).await;
        socket.push_ping();
        settle().await;
    }

    assert_eq!(transport.socket_count(), 1);
    assert!(!socket.is_closed());
    assert!(socket.sent_of_type("stop").is_empty());
    assert_eq!(manager.state("dev-1"), SubscriptionState::Subscribed);
}

// ============================================================================
// Reconnect
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnect_backs_off_and_resets_after_success() {
    let transport = MockRealtimeTransport::new();
    let manager = manager(&transport).await;
    manager.connect("dev-1", ConnectOptions::new()).await.unwrap();
    let socket = transport.wait_for_socket(1).await;

    transport.fail_next_open(TransportError::ConnectFailed("refused".to_string()));
    socket.push_close(Some(1006), "abnormal closure");
    settle().await;
    assert_eq!(manager.state("dev-1"), SubscriptionState::Disconnected);
    assert_eq!(manager.reconnect_attempts("dev-1"), 1);

    // First reconnect fires within 1.5s and fails; the second waits 2-2.5s more.
    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_eq!(transport.open_attempts(), 2);
    assert_eq!(manager.reconnect_attempts("dev-1"), 2);
    assert_eq!(manager.state("dev-1"), SubscriptionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(transport.open_attempts(), 3);
    assert_eq!(transport.socket_count(), 2);
    assert!(manager.is_connected("dev-1"));
    assert_eq!(manager.reconnect_attempts("dev-1"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_server_complete_triggers_reconnect() {
    let transport = MockRealtimeTransport::new();
    let manager = manager(&transport).await;
    manager.connect("dev-1", ConnectOptions::new()).await.unwrap();
    let socket = transport.wait_for_socket(1).await;

    socket.push_frame(json!({ "type": "complete", "id": subscription_id(&socket) }));
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(socket.is_closed());
    assert_eq!(transport.socket_count(), 2);
    assert!(manager.is_connected("dev-1"));
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_pending_reconnect() {
    let transport = MockRealtimeTransport::new();
    let manager = manager(&transport).await;
    manager.connect("dev-1", ConnectOptions::new()).await.unwrap();
    let socket = transport.wait_for_socket(1).await;

    socket.push_close(Some(1006), "abnormal closure");
    settle().await;
    manager.close("dev-1").await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.open_attempts(), 1);
    assert!(manager.device_ids().is_empty());
    assert_eq!(manager.state("dev-1"), SubscriptionState::Disconnected);
}

// ============================================================================
// Close
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_close_stops_subscription_and_drops_late_data() {
    let transport = MockRealtimeTransport::new();
    let manager = manager(&transport).await;
    let (callback, received) = recording_callback();
    manager
        .connect("dev-1", ConnectOptions::new().with_callback(callback))
        .await
        .unwrap();
    let socket = transport.wait_for_socket(1).await;
    let id = subscription_id(&socket);

    manager.close("dev-1").await;
    socket.push_frame(data_frame(&id, 9));
    settle().await;

    assert!(socket.is_closed());
    assert_eq!(socket.sent_of_type("stop")[0]["id"], id.as_str());
    assert!(received.lock().unwrap().is_empty());
    assert!(!manager.is_connected("dev-1"));
}

#[tokio::test(start_paused = true)]
async fn test_close_all_is_idempotent() {
    let transport = MockRealtimeTransport::new();
    let manager = manager(&transport).await;
    manager.connect("dev-1", ConnectOptions::new()).await.unwrap();
    manager.connect("dev-2", ConnectOptions::new()).await.unwrap();
    assert_eq!(manager.device_ids(), vec!["dev-1", "dev-2"]);

    manager.close_all().await;
    manager.close_all().await;
    manager.close("dev-1").await;

    assert!(manager.device_ids().is_empty());
    for socket in transport.sockets() {
        assert!(socket.is_closed());
        assert_eq!(socket.sent_of_type("stop").len(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_close_uses_new_record() {
    let transport = MockRealtimeTransport::new();
    let manager = manager(&transport).await;
    manager.connect("dev-1", ConnectOptions::new()).await.unwrap();
    manager.close("dev-1").await;

    let state = manager.connect("dev-1", ConnectOptions::new()).await.unwrap();
    assert_eq!(*state.borrow(), SubscriptionState::Subscribed);
    assert_eq!(transport.socket_count(), 2);
    assert_ne!(
        subscription_id(&transport.sockets()[0]),
        subscription_id(&transport.sockets()[1])
    );
}
