use std::time::Duration;

use quieteye_relay::{
    application::config::{AuthMode, EdgeConfig},
    domain::{
        backoff::RetryBackoff,
        models::{AlertEvent, EventType},
    },
    edge::{
        agent::EdgeAgent,
        delivery::{DeliveryClient, HttpTransport},
        inbox::DefaultExecutor,
        outbox::OutboxQueue,
    },
    storage::SqliteStore,
};
use serde_json::{Value, json};

use super::support::{command_body, get_json, post_json, spawn_server};

fn edge_event(alert_id: &str, event_type: EventType) -> AlertEvent {
    AlertEvent {
        alert_id: alert_id.to_owned(),
        device_id: "edge-e2e".to_owned(),
        site_id: Some("site-9".to_owned()),
        camera_id: "cam-dock".to_owned(),
        zone: Some("loading".to_owned()),
        event_type,
        confidence: 0.88,
        coordinates: None,
        timestamp: chrono::Utc::now(),
        snapshot: Some(b"jpeg bytes".to_vec()),
        extra: json!({ "trackId": 42 }),
    }
}

fn edge_backoff() -> RetryBackoff {
    RetryBackoff::new(
        Duration::from_millis(20),
        Duration::from_millis(100),
        Duration::ZERO,
    )
}

#[tokio::test]
async fn outbox_drains_to_the_gateway_over_http() {
    let server = spawn_server(AuthMode::None).await;
    let base = server.base_url();

    let edge_dir = tempfile::tempdir().expect("temp dir");
    let store = SqliteStore::connect(&edge_dir.path().join("edge.db"))
        .await
        .expect("edge store connects");
    let queue = OutboxQueue::new(store, 100);

    queue
        .enqueue(&edge_event("e2e-1", EventType::Fire))
        .await
        .expect("enqueue");
    queue
        .enqueue(&edge_event("e2e-2", EventType::Loitering))
        .await
        .expect("enqueue");

    let transport = HttpTransport::new(&base, None, Duration::from_secs(2))
        .expect("transport builds");
    let mut client = DeliveryClient::new(queue.clone(), transport, edge_backoff(), 256 * 1024);

    let delivered = client.drain_once().await.expect("drain succeeds");
    assert_eq!(delivered, 2);
    assert_eq!(queue.len().await.expect("len"), 0);

    let listed = get_json(&format!("{base}/v1/alerts?deviceId=edge-e2e")).await;
    let alerts = listed["alerts"].as_array().expect("alerts array");
    assert_eq!(alerts.len(), 2);

    // Redelivering an already-accepted alert is a duplicate, not an error.
    queue
        .enqueue(&edge_event("e2e-1", EventType::Fire))
        .await
        .expect("enqueue");
    assert_eq!(client.drain_once().await.expect("drain succeeds"), 1);
    let listed = get_json(&format!("{base}/v1/alerts?deviceId=edge-e2e")).await;
    assert_eq!(listed["alerts"].as_array().expect("alerts array").len(), 2);

    server.stop().await;
}

#[tokio::test]
async fn edge_agent_polls_executes_and_acks() {
    let server = spawn_server(AuthMode::None).await;
    let base = server.base_url();

    let edge_dir = tempfile::tempdir().expect("temp dir");
    let config = EdgeConfig::for_test(
        base.clone(),
        "edge-agent".to_owned(),
        edge_dir.path().join("edge.db"),
    );
    let agent = EdgeAgent::connect(config).await.expect("agent connects");

    let enqueue = post_json(
        &format!("{base}/v1/commands"),
        &command_body("edge-agent", "healthcheck"),
    )
    .await;
    let enqueue: Value = enqueue.json().await.expect("json response");
    let command_id = enqueue["commandId"].as_str().expect("command id").to_owned();

    let handled = agent
        .poll_once(&DefaultExecutor)
        .await
        .expect("poll succeeds");
    assert_eq!(handled, 1);

    let record = get_json(&format!("{base}/v1/commands/{command_id}")).await;
    assert_eq!(record["state"], "acknowledged");
    assert_eq!(record["detail"], "ok");

    // The same command redelivered is not executed twice; a repeat poll
    // simply finds nothing deliverable.
    let handled = agent
        .poll_once(&DefaultExecutor)
        .await
        .expect("poll succeeds");
    assert_eq!(handled, 0);

    server.stop().await;
}

#[tokio::test]
async fn unauthorized_delivery_dead_letters_instead_of_looping() {
    let server = spawn_server(AuthMode::Token("right".to_owned())).await;
    let base = server.base_url();

    let edge_dir = tempfile::tempdir().expect("temp dir");
    let store = SqliteStore::connect(&edge_dir.path().join("edge.db"))
        .await
        .expect("edge store connects");
    let queue = OutboxQueue::new(store, 100);
    queue
        .enqueue(&edge_event("e2e-auth", EventType::Intrusion))
        .await
        .expect("enqueue");

    let transport = HttpTransport::new(&base, Some("wrong".to_owned()), Duration::from_secs(2))
        .expect("transport builds");
    let mut client = DeliveryClient::new(queue.clone(), transport, edge_backoff(), 256 * 1024);

    assert_eq!(client.drain_once().await.expect("drain succeeds"), 0);
    assert_eq!(queue.len().await.expect("len"), 0);
    let dead = queue.dead_letters().await.expect("dead letters");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].event.alert_id, "e2e-auth");

    server.stop().await;
}
