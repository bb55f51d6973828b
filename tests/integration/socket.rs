//! End-to-end tests over real WebSocket connections

use std::net::SocketAddr;
use std::time::Duration;

use chatshard::backend::routes::create_router;
use chatshard::backend::services::PresenceStore;
use chatshard::shared::envelope::{self, ContentKind, Envelope};
use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::common::{eventually, test_config, TestPool, RECV_TIMEOUT};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(harness: &TestPool) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(harness.state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, identity: &str) -> Client {
    let (socket, _) = connect_async(format!("ws://{addr}/ws?uuid={identity}"))
        .await
        .expect("websocket handshake");
    socket
}

async fn wait_registered(harness: &TestPool, count: usize) {
    let pool = harness.pool.clone();
    assert!(
        eventually(|| {
            let pool = pool.clone();
            async move { pool.clients().await.len() == count }
        })
        .await,
        "expected {count} registered clients"
    );
}

/// Next binary frame decoded as an envelope, skipping control frames
async fn next_envelope(socket: &mut Client) -> Envelope {
    loop {
        let message = tokio::time::timeout(RECV_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("read error");
        match message {
            Message::Binary(bytes) => return envelope::decode(&bytes).expect("decode"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_direct_message_over_sockets() {
    let harness = TestPool::new(test_config().build().unwrap());
    let addr = serve(&harness).await;

    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;
    wait_registered(&harness, 2).await;

    let clients = harness.pool.clients().await;
    assert!(clients.iter().all(|client| client.remote_addr.is_some()));

    let message = Envelope::direct("alice", "bob", ContentKind::Text, "over the wire").with_message_id("w-1");
    alice
        .send(Message::Binary(envelope::encode(&message).unwrap()))
        .await
        .unwrap();

    assert_eq!(next_envelope(&mut bob).await, message);
    bob.close(None).await.unwrap();
    alice.close(None).await.unwrap();
}

#[tokio::test]
async fn test_json_heartbeat_is_answered_with_pong() {
    let harness = TestPool::new(test_config().build().unwrap());
    let addr = serve(&harness).await;
    let mut alice = connect(addr, "alice").await;
    wait_registered(&harness, 1).await;

    alice
        .send(Message::Text(r#"{"type":"heartbeat","from":"alice"}"#.to_string()))
        .await
        .unwrap();

    let pong = next_envelope(&mut alice).await;
    assert!(pong.is_heartbeat());
    assert_eq!(pong.content, "pong");
}

#[tokio::test]
async fn test_json_chat_frame_is_routed() {
    let harness = TestPool::new(test_config().build().unwrap());
    let addr = serve(&harness).await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;
    wait_registered(&harness, 2).await;

    alice
        .send(Message::Text(
            r#"{"from":"alice","to":"bob","content":"typed by hand","content_type":1,"message_type":1}"#
                .to_string(),
        ))
        .await
        .unwrap();

    let received = next_envelope(&mut bob).await;
    assert_eq!(received.from, "alice");
    assert_eq!(received.content, "typed by hand");
}

#[tokio::test]
async fn test_upgrade_without_identity_is_unauthorized() {
    let harness = TestPool::new(test_config().build().unwrap());
    let addr = serve(&harness).await;

    for url in [format!("ws://{addr}/ws"), format!("ws://{addr}/ws?uuid=%20")] {
        match connect_async(url).await {
            Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 401),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("upgrade should have been refused"),
        }
    }
    assert_eq!(harness.pool.stats().await.shards.iter().map(|s| s.load).sum::<usize>(), 0);
}

#[tokio::test]
async fn test_client_close_unregisters() {
    let harness = TestPool::new(test_config().build().unwrap());
    let addr = serve(&harness).await;
    let mut alice = connect(addr, "alice").await;
    wait_registered(&harness, 1).await;
    assert!(harness.presence.is_online("alice").await.unwrap());

    alice.close(None).await.unwrap();

    wait_registered(&harness, 0).await;
    let presence = harness.presence.clone();
    assert!(
        eventually(|| {
            let presence = presence.clone();
            async move { !presence.is_online("alice").await.unwrap() }
        })
        .await
    );
    let stats = harness.pool.stats().await;
    assert_eq!(stats.tracked_identities, 0);
    assert!(stats.shards.iter().all(|shard| shard.load == 0));
}

#[tokio::test]
async fn test_silent_client_is_disconnected() {
    let harness = TestPool::new(test_config().heartbeat(1, 2).build().unwrap());
    let addr = serve(&harness).await;
    let mut alice = connect(addr, "alice").await;
    wait_registered(&harness, 1).await;

    // Not polling the socket means server pings go unanswered.
    tokio::time::sleep(Duration::from_millis(4500)).await;

    let closed = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match alice.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server kept the silent connection open");
    wait_registered(&harness, 0).await;
    assert!(!harness.presence.is_online("alice").await.unwrap());
}
