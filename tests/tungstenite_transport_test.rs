//! WebSocket transport against a local tokio-tungstenite server.

use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use hublink::adapters::TungsteniteTransport;
use hublink::error::TransportError;
use hublink::traits::{RealtimeTransport, SocketEvent};

/// What the server saw during the upgrade.
#[derive(Debug)]
struct Upgrade {
    uri: String,
    protocol: Option<String>,
}

/// Accept one connection, echo the requested subprotocol and hand the
/// stream to `script`.
async fn serve_once<F, Fut>(script: F) -> (String, oneshot::Receiver<Upgrade>)
where
    F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (upgrade_tx, upgrade_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = move |request: &Request, mut response: Response| {
            let protocol = request.headers().get("Sec-WebSocket-Protocol").cloned();
            if let Some(protocol) = &protocol {
                response
                    .headers_mut()
                    .insert("Sec-WebSocket-Protocol", protocol.clone());
            }
            let _ = upgrade_tx.send(Upgrade {
                uri: request.uri().to_string(),
                protocol: protocol.and_then(|p| p.to_str().ok().map(str::to_string)),
            });
            Ok::<Response, ErrorResponse>(response)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();
        script(ws).await;
    });

    (format!("ws://{}/graphql", addr), upgrade_rx)
}

#[tokio::test]
async fn test_exchanges_frames_with_graphql_ws_server() {
    let (url, upgrade) = serve_once(|mut ws| async move {
        let Some(Ok(Message::Text(init))) = ws.next().await else {
            panic!("expected connection_init");
        };
        assert!(init.contains("connection_init"));
        ws.send(Message::Text(r#"{"type":"connection_ack"}"#.to_string()))
            .await
            .unwrap();
        ws.send(Message::Ping(vec![1, 2, 3])).await.unwrap();
        ws.send(Message::Binary(br#"{"type":"ka"}"#.to_vec()))
            .await
            .unwrap();
        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::Borrowed("bye"),
        }))
        .await
        .unwrap();
        while ws.next().await.is_some() {}
    })
    .await;

    let transport = TungsteniteTransport::new();
    let mut socket = transport
        .open(&format!("{}?header=abc&payload=e30%3D", url))
        .await
        .unwrap();

    let upgrade = upgrade.await.unwrap();
    assert_eq!(upgrade.protocol.as_deref(), Some("graphql-ws"));
    assert!(upgrade.uri.contains("header=abc"));

    socket
        .send_text(r#"{"type":"connection_init"}"#.to_string())
        .await
        .unwrap();
    assert_eq!(
        socket.next_event().await,
        SocketEvent::Text(r#"{"type":"connection_ack"}"#.to_string())
    );
    assert_eq!(socket.next_event().await, SocketEvent::Alive);
    assert_eq!(
        socket.next_event().await,
        SocketEvent::Text(r#"{"type":"ka"}"#.to_string())
    );
    assert_eq!(
        socket.next_event().await,
        SocketEvent::Closed {
            code: Some(1000),
            reason: "bye".to_string()
        }
    );

    assert!(matches!(socket.next_event().await, SocketEvent::Closed { code: None, .. }));
    assert!(matches!(
        socket.send_text("{}".to_string()).await,
        Err(TransportError::SendFailed(_))
    ));
    assert!(socket.close().await.is_ok());
}

#[tokio::test]
async fn test_client_close_reaches_server() {
    let (closed_tx, closed_rx) = oneshot::channel();
    let (url, _upgrade) = serve_once(|mut ws| async move {
        let mut saw_close = false;
        while let Some(message) = ws.next().await {
            if matches!(message, Ok(Message::Close(_))) {
                saw_close = true;
            }
        }
        let _ = closed_tx.send(saw_close);
    })
    .await;

    let mut socket = TungsteniteTransport::new().open(&url).await.unwrap();
    socket.close().await.unwrap();
    socket.close().await.unwrap();

    assert!(closed_rx.await.unwrap());
}

#[tokio::test]
async fn test_open_failures_are_connect_errors() {
    let transport = TungsteniteTransport::new();

    let refused = transport.open("ws://127.0.0.1:1/graphql").await;
    assert!(matches!(refused, Err(TransportError::ConnectFailed(_))));

    let invalid = transport.open("not a url").await;
    assert!(matches!(invalid, Err(TransportError::ConnectFailed(_))));
}
