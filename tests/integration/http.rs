//! HTTP surface: monitoring, offline messages, presence stream

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chatshard::backend::routes::create_router;
use chatshard::backend::routes::message_routes::MarkReadResponse;
use chatshard::backend::services::{MessageStatus, OfflineMessage, OfflineStore};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::common::{test_config, TestPool};

fn app(harness: &TestPool) -> Router {
    create_router(harness.state.clone())
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_health() {
    let harness = TestPool::new(test_config().build().unwrap());
    let (status, body) = get(app(&harness), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn test_shard_stats_report_pool_shape() {
    let harness = TestPool::new(test_config().shards(2, 4).load_threshold(100).build().unwrap());
    let _alice = harness.connect("alice").await;

    let (status, body) = get(app(&harness), "/monitor/shards").await;
    assert_eq!(status, StatusCode::OK);
    let stats: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(stats["total_shards"], 2);
    assert_eq!(stats["max_shards"], 4);
    assert_eq!(stats["load_threshold"], 100);
    assert_eq!(stats["tracked_identities"], 1);
    assert_eq!(stats["shards"][0]["load"], 1);
    assert_eq!(stats["shards"][1]["load"], 0);
}

#[tokio::test]
async fn test_clients_lists_live_connections() {
    let harness = TestPool::new(test_config().build().unwrap());
    let _bob = harness.connect("bob").await;
    let _alice = harness.connect("alice").await;

    let (status, body) = get(app(&harness), "/monitor/clients").await;
    assert_eq!(status, StatusCode::OK);
    let clients: Vec<Value> = serde_json::from_slice(&body).unwrap();
    let identities: Vec<&str> = clients.iter().filter_map(|c| c["identity"].as_str()).collect();
    assert_eq!(identities, vec!["alice", "bob"]);
    assert_eq!(clients[0]["shard_id"], 1);
}

#[tokio::test]
async fn test_unread_requires_identity() {
    let harness = TestPool::new(test_config().build().unwrap());
    let (status, body) = get(app(&harness), "/messages/unread").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    crate::assert_contains!(String::from_utf8_lossy(&body), "uuid is required");
}

#[tokio::test]
async fn test_unread_pages_and_mark_read() {
    let harness = TestPool::new(test_config().build().unwrap());
    for n in 0..3 {
        harness
            .offline
            .persist_unread("alice", "carol", &format!("note {n}"), &format!("m-{n}"))
            .await
            .unwrap();
    }

    let (status, body) = get(app(&harness), "/messages/unread?uuid=carol&page=1&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    let first_page: Vec<OfflineMessage> = serde_json::from_slice(&body).unwrap();
    assert_eq!(first_page.len(), 2);
    assert_eq!(first_page[0].content, "note 0");
    assert!(first_page.iter().all(|m| m.status == MessageStatus::Unread));

    let (_, body) = get(app(&harness), "/messages/unread?uuid=carol&page=2&limit=2").await;
    let second_page: Vec<OfflineMessage> = serde_json::from_slice(&body).unwrap();
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].message_id, "m-2");

    let (status, body) = post_json(
        app(&harness),
        "/messages/read",
        json!({"uuid": "carol", "message_ids": ["m-0", "m-2", "missing"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let response: MarkReadResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response, MarkReadResponse { updated: 2 });

    let remaining = harness.offline.list_unread("carol", 1, 10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].message_id, "m-1");
}

#[tokio::test]
async fn test_mark_read_with_no_ids_updates_nothing() {
    let harness = TestPool::new(test_config().build().unwrap());
    let (status, body) = post_json(app(&harness), "/messages/read", json!({"uuid": "carol"})).await;
    assert_eq!(status, StatusCode::OK);
    let response: MarkReadResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.updated, 0);
}

#[tokio::test]
async fn test_presence_stream_unavailable_without_broker() {
    let harness = TestPool::new(test_config().broker_enabled(false).build().unwrap());
    let (status, _) = get(app(&harness), "/events").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_presence_stream_opens_with_broker() {
    let harness = TestPool::new(test_config().broker_enabled(true).build().unwrap());
    let response = app(&harness)
        .oneshot(Request::builder().uri("/events?kinds=online").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let harness = TestPool::new(test_config().build().unwrap());
    let (status, _) = get(app(&harness), "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
