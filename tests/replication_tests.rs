//! Replication integration tests: convergence, idempotent redelivery, and
//! delivery through real loopback listeners including an unreachable peer
//! that recovers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use branchsync::replication::{Dispatcher, ReplicationEvent};
use branchsync::server::auth::{ensure_admin_user, AuthService};
use branchsync::server::AppState;
use branchsync::store::Role;
use branchsync::{create_router, NodeConfig, StorageEngine};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::watch;
use tower::util::ServiceExt;

const REPLICA_TOKEN: &str = "test-replica-token";

fn test_config(peers: Vec<String>) -> NodeConfig {
    NodeConfig {
        node_id: "node-test".to_string(),
        port: 0,
        data_dir: String::new(),
        peers,
        replication_token: REPLICA_TOKEN.to_string(),
        retry_interval: Duration::from_millis(150),
        request_timeout: Duration::from_secs(2),
        jwt_expires_minutes: 60,
        admin_user: "admin".to_string(),
        admin_password: "admin123".to_string(),
        seen_cache_size: 1024,
    }
}

fn create_test_app(peers: Vec<String>) -> (axum::Router, AppState, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = Arc::new(StorageEngine::open(temp_dir.path()).expect("Failed to open storage"));
    let state = AppState::new(test_config(peers), engine);
    ensure_admin_user(&state).expect("Failed to bootstrap admin");
    let router = create_router(state.clone());
    (router, state, temp_dir)
}

fn admin_token() -> String {
    AuthService::create_jwt("admin", Role::Admin, 60).unwrap()
}

async fn request_json(
    app: &axum::Router,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(json!(null));
    (status, json)
}

/// Deliver one event to a node's replica endpoint, returning the outcome.
async fn deliver(app: &axum::Router, event: &ReplicationEvent) -> (StatusCode, Value) {
    let body = serde_json::to_value(event).unwrap();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/replica/event")
                .header(header::CONTENT_TYPE, "application/json")
                .header("X-Replica-Token", REPLICA_TOKEN)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(json!(null)))
}

/// Pop every event currently queued for the node's first peer.
fn drain_queue(state: &AppState) -> Vec<Arc<ReplicationEvent>> {
    let peer = &state.queues.peers()[0];
    let mut events = Vec::new();
    while let Some(event) = peer.head() {
        peer.acknowledge(event.event_id);
        events.push(event);
    }
    events
}

async fn wait_for<F: Fn() -> bool>(cond: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// The spec walkthrough: product created on A converges on B at version 1,
/// an adjustment converges at version 2, and redelivering the version-1
/// event afterwards leaves B unchanged.
#[tokio::test]
async fn test_two_node_convergence_and_stale_redelivery() {
    // A queues events for an unroutable peer; we play postman by hand.
    let (app_a, state_a, _dir_a) = create_test_app(vec!["http://192.0.2.1:9".to_string()]);
    let (app_b, state_b, _dir_b) = create_test_app(vec![]);
    let admin = admin_token();

    let (_, product) = request_json(
        &app_a,
        "POST",
        "/products",
        Some(&admin),
        Some(json!({ "name": "Widget" })),
    )
    .await;
    let product_id = product["id"].as_str().unwrap().to_string();
    request_json(
        &app_a,
        "PUT",
        &format!("/stock/{}", product_id),
        Some(&admin),
        Some(json!({ "delta": 10 })),
    )
    .await;

    let first_batch = drain_queue(&state_a);
    for event in &first_batch {
        let (status, _) = deliver(&app_b, event).await;
        assert_eq!(status, StatusCode::OK);
    }

    let stock_b = state_b.inventory.get_stock(&product_id).unwrap();
    assert_eq!(stock_b.quantity, 10);
    assert_eq!(stock_b.version, 1);

    // Adjust A down to 7 (version 2) and deliver
    request_json(
        &app_a,
        "PUT",
        &format!("/stock/{}", product_id),
        Some(&admin),
        Some(json!({ "delta": -3 })),
    )
    .await;
    for event in &drain_queue(&state_a) {
        let (status, _) = deliver(&app_b, event).await;
        assert_eq!(status, StatusCode::OK);
    }

    let stock_b = state_b.inventory.get_stock(&product_id).unwrap();
    assert_eq!(stock_b.quantity, 7);
    assert_eq!(stock_b.version, 2);

    // Redeliver the version-1 stock event: ignored, state unchanged
    let stale = first_batch
        .iter()
        .find(|e| e.entity_id == product_id && e.version == 1 && e.payload.get("entry").is_some())
        .expect("stock event from the first batch");
    let (status, body) = deliver(&app_b, stale).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "duplicate_ignored");

    let stock_b = state_b.inventory.get_stock(&product_id).unwrap();
    assert_eq!(stock_b.quantity, 7);
    assert_eq!(stock_b.version, 2);
}

/// Versions arriving out of order still converge to the highest one.
#[tokio::test]
async fn test_out_of_order_delivery_converges() {
    let (app_a, state_a, _dir_a) = create_test_app(vec!["http://192.0.2.1:9".to_string()]);
    let (app_c, state_c, _dir_c) = create_test_app(vec![]);
    let admin = admin_token();

    let (_, product) = request_json(
        &app_a,
        "POST",
        "/products",
        Some(&admin),
        Some(json!({ "name": "Widget" })),
    )
    .await;
    let product_id = product["id"].as_str().unwrap().to_string();
    request_json(
        &app_a,
        "PUT",
        &format!("/stock/{}", product_id),
        Some(&admin),
        Some(json!({ "delta": 10 })),
    )
    .await;
    request_json(
        &app_a,
        "PUT",
        &format!("/stock/{}", product_id),
        Some(&admin),
        Some(json!({ "delta": -3 })),
    )
    .await;

    let events = drain_queue(&state_a);
    let stock_events: Vec<_> = events
        .iter()
        .filter(|e| e.payload.get("entry").is_some())
        .collect();
    assert_eq!(stock_events.len(), 2);

    // Deliver v2 before v1
    let (status, _) = deliver(&app_c, stock_events[1]).await;
    assert_eq!(status, StatusCode::OK);
    let stock_c = state_c.inventory.get_stock(&product_id).unwrap();
    assert_eq!((stock_c.quantity, stock_c.version), (7, 2));

    let (status, body) = deliver(&app_c, stock_events[0]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "duplicate_ignored");
    let stock_c = state_c.inventory.get_stock(&product_id).unwrap();
    assert_eq!((stock_c.quantity, stock_c.version), (7, 2));
}

/// Orders replicate with their embedded client and products, and the same
/// event id applies only once.
#[tokio::test]
async fn test_order_event_replicates_and_is_idempotent() {
    let (app_a, state_a, _dir_a) = create_test_app(vec!["http://192.0.2.1:9".to_string()]);
    let (app_b, state_b, _dir_b) = create_test_app(vec![]);
    let admin = admin_token();

    let (_, product) = request_json(
        &app_a,
        "POST",
        "/products",
        Some(&admin),
        Some(json!({ "name": "Widget" })),
    )
    .await;
    let product_id = product["id"].as_str().unwrap().to_string();
    request_json(
        &app_a,
        "PUT",
        &format!("/stock/{}", product_id),
        Some(&admin),
        Some(json!({ "delta": 5 })),
    )
    .await;
    let (_, client) = request_json(
        &app_a,
        "POST",
        "/clients",
        Some(&admin),
        Some(json!({ "name": "ACME Ltda" })),
    )
    .await;
    let client_id = client["id"].as_str().unwrap().to_string();
    let (_, body) = request_json(
        &app_a,
        "POST",
        "/orders",
        Some(&admin),
        Some(json!({
            "client_id": client_id,
            "items": [{ "product_id": product_id, "quantity": 2 }],
            "order_id": "ord-1",
        })),
    )
    .await;
    assert_eq!(body["order"]["id"], "ord-1");

    let events = drain_queue(&state_a);
    for event in &events {
        let (status, _) = deliver(&app_b, event).await;
        assert_eq!(status, StatusCode::OK);
    }

    let order_b = state_b.inventory.get_order("ord-1").unwrap().unwrap();
    assert_eq!(order_b.client_name, "ACME Ltda");
    assert_eq!(order_b.items[0].quantity, 2);
    assert_eq!(state_b.inventory.get_stock(&product_id).unwrap().quantity, 3);

    // Second delivery of the full batch: every event reports a duplicate
    for event in &events {
        let (status, body) = deliver(&app_b, event).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "duplicate_ignored");
    }
    assert_eq!(state_b.inventory.get_stock(&product_id).unwrap().quantity, 3);
}

/// Full wire test: a dispatcher drains A's queue into a live B listener.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispatcher_delivers_to_live_peer() {
    let (router_b, state_b, _dir_b) = create_test_app(vec![]);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_b = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router_b).await.unwrap();
    });

    let (app_a, state_a, _dir_a) = create_test_app(vec![format!("http://{}", addr_b)]);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let _handles = Dispatcher::spawn_all(&state_a.queues, &state_a.config, shutdown_rx).unwrap();

    let admin = admin_token();
    let (_, product) = request_json(
        &app_a,
        "POST",
        "/products",
        Some(&admin),
        Some(json!({ "name": "Widget" })),
    )
    .await;
    let product_id = product["id"].as_str().unwrap().to_string();
    request_json(
        &app_a,
        "PUT",
        &format!("/stock/{}", product_id),
        Some(&admin),
        Some(json!({ "delta": 10 })),
    )
    .await;

    let state_b2 = state_b.clone();
    let pid = product_id.clone();
    wait_for(
        move || {
            state_b2
                .inventory
                .get_stock(&pid)
                .map(|s| s.quantity == 10)
                .unwrap_or(false)
        },
        "stock to converge on B",
    )
    .await;

    let state_a2 = state_a.clone();
    wait_for(
        move || state_a2.queues.depths().values().sum::<usize>() == 0,
        "A's backlog to drain",
    )
    .await;
}

/// An unreachable peer accumulates backlog without losing events; once the
/// peer comes up, everything is delivered and the backlog drains to zero.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_peer_recovers_without_losing_events() {
    // Reserve an address, then close it so the peer starts out unreachable
    let reserved = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_b: SocketAddr = reserved.local_addr().unwrap();
    drop(reserved);

    let (app_a, state_a, _dir_a) = create_test_app(vec![format!("http://{}", addr_b)]);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let _handles = Dispatcher::spawn_all(&state_a.queues, &state_a.config, shutdown_rx).unwrap();

    let admin = admin_token();
    let (_, product) = request_json(
        &app_a,
        "POST",
        "/products",
        Some(&admin),
        Some(json!({ "name": "Widget" })),
    )
    .await;
    let product_id = product["id"].as_str().unwrap().to_string();

    // Give the dispatcher a few failed attempts; nothing may be dropped
    tokio::time::sleep(Duration::from_millis(600)).await;
    let backlog: usize = state_a.queues.depths().values().sum();
    assert!(backlog >= 1, "backlog must be retained while peer is down");

    // Bring B up on the reserved address
    let (router_b, state_b, _dir_b) = create_test_app(vec![]);
    let listener = tokio::net::TcpListener::bind(addr_b).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router_b).await.unwrap();
    });

    let state_a2 = state_a.clone();
    wait_for(
        move || state_a2.queues.depths().values().sum::<usize>() == 0,
        "backlog to drain after peer recovery",
    )
    .await;

    let product_b = state_b.inventory.get_product(&product_id).unwrap();
    assert!(product_b.is_some(), "product must reach the recovered peer");
    assert_eq!(product_b.unwrap().version, 1);
}
