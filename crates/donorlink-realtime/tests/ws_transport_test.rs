//! WebSocket transport against a loopback tokio-tungstenite server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;

use donorlink_core::{names, Command, ConnectionState, Event, Identity, Role, Session};
use donorlink_realtime::transport::IDENTITY_HEADER;
use donorlink_realtime::{ConnectionManager, Connector, Handshake, ReconnectPolicy, WsConnector};

/// Headers seen on the upgrade request.
#[derive(Debug)]
struct SeenHeaders {
    authorization: Option<String>,
    identity: Option<String>,
}

/// Server side of one accepted connection.
struct TestServer {
    url: String,
    headers: oneshot::Receiver<SeenHeaders>,
    /// Text frames received from the client.
    received: mpsc::UnboundedReceiver<String>,
    /// Text frames to send to the client.
    send: mpsc::UnboundedSender<String>,
}

async fn spawn_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (headers_tx, headers_rx) = oneshot::channel();
    let (received_tx, received_rx) = mpsc::unbounded_channel();
    let (send_tx, mut send_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = move |req: &Request, resp: Response| {
            let header = |name: &str| {
                req.headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            let _ = headers_tx.send(SeenHeaders {
                authorization: header("authorization"),
                identity: header(IDENTITY_HEADER),
            });
            Ok(resp)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                outgoing = send_rx.recv() => match outgoing {
                    Some(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = sink.close().await;
                        break;
                    }
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(msg)) if msg.is_text() => {
                        let _ = received_tx.send(msg.into_text().unwrap());
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                },
            }
        }
    });

    TestServer {
        url: format!("ws://{addr}/realtime"),
        headers: headers_rx,
        received: received_rx,
        send: send_tx,
    }
}

async fn next_frame(received: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .expect("timeout waiting for client frame")
        .expect("server stopped")
}

#[tokio::test]
async fn test_handshake_carries_credentials_as_headers() {
    let mut server = spawn_server().await;
    let connector = WsConnector::new(server.url.clone());
    let handshake = Handshake {
        identity_id: "u-77".into(),
        auth_token: "tok-123".into(),
    };

    let link = connector.connect(&handshake).await.unwrap();
    let headers = (&mut server.headers).await.unwrap();
    assert_eq!(headers.authorization.as_deref(), Some("Bearer tok-123"));
    assert_eq!(headers.identity.as_deref(), Some("u-77"));

    // Credentials never travel as frames.
    link.outbound
        .send(Command::join_personal("u-77"))
        .await
        .unwrap();
    let frame = next_frame(&mut server.received).await;
    assert!(!frame.contains("tok-123"));
    assert_eq!(
        Command::from_frame(&frame).unwrap(),
        Command::join_personal("u-77")
    );
}

#[tokio::test]
async fn test_malformed_frames_are_skipped() {
    let server = spawn_server().await;
    let connector = WsConnector::new(server.url.clone());
    let handshake = Handshake {
        identity_id: "u1".into(),
        auth_token: "t".into(),
    };
    let mut link = connector.connect(&handshake).await.unwrap();

    server.send.send("not json".into()).unwrap();
    server.send.send(r#"{"data":{}}"#.into()).unwrap();
    server
        .send
        .send(
            Event::new(names::STATS_UPDATED, json!({"total": 3}))
                .to_frame()
                .unwrap(),
        )
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), link.inbound.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(event.name, names::STATS_UPDATED);
    assert_eq!(event.payload["total"], 3);

    // Server going away ends the stream.
    drop(server.send);
    let end = tokio::time::timeout(Duration::from_secs(5), link.inbound.next())
        .await
        .unwrap();
    assert!(end.is_none() || matches!(end, Some(Err(_))));
}

#[tokio::test]
async fn test_manager_over_websocket_joins_rooms_and_delivers() {
    let mut server = spawn_server().await;
    let manager = ConnectionManager::new(
        Arc::new(WsConnector::new(server.url.clone())),
        ReconnectPolicy::default().with_max_attempts(1).without_jitter(),
    );
    let session = Session::new(
        Identity::new("staff-1", Role::NgoAdmin).with_organization("ngo-9"),
        "tok",
    );
    let mut handle = manager.establish(Some(&session)).unwrap();

    let delivered = Arc::new(AtomicUsize::new(0));
    {
        let delivered = Arc::clone(&delivered);
        handle.on(names::NGO_VERIFIED, move |event| {
            assert_eq!(event.id_field("ngoId").as_deref(), Some("ngo-9"));
            delivered.fetch_add(1, Ordering::SeqCst);
        });
    }

    let first = next_frame(&mut server.received).await;
    let second = next_frame(&mut server.received).await;
    assert_eq!(
        Command::from_frame(&first).unwrap(),
        Command::join_personal("staff-1")
    );
    assert_eq!(
        Command::from_frame(&second).unwrap(),
        Command::join_organization("ngo-9")
    );
    assert_eq!(handle.state(), ConnectionState::Connected);

    server
        .send
        .send(
            Event::new(names::NGO_VERIFIED, json!({"ngoId": "ngo-9"}))
                .to_frame()
                .unwrap(),
        )
        .unwrap();

    for _ in 0..50 {
        if delivered.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    handle.close().await;
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}
