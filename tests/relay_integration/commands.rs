use std::time::Duration;

use quieteye_relay::application::config::AuthMode;
use serde_json::{Value, json};

use super::support::{command_body, get_json, post_json, spawn_server};

#[tokio::test]
async fn command_flows_queued_delivered_acknowledged() {
    let server = spawn_server(AuthMode::None).await;
    let base = server.base_url();

    let enqueue = post_json(
        &format!("{base}/v1/commands"),
        &command_body("edge-1", "healthcheck"),
    )
    .await;
    assert!(enqueue.status().is_success());
    let enqueue: Value = enqueue.json().await.expect("json response");
    assert_eq!(enqueue["state"], "queued");
    let command_id = enqueue["commandId"].as_str().expect("command id").to_owned();

    // First poll delivers the command.
    let poll = post_json(
        &format!("{base}/v1/devices/edge-1/commands/poll"),
        &json!({}),
    )
    .await;
    let poll: Value = poll.json().await.expect("json response");
    let commands = poll["commands"].as_array().expect("commands array");
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0]["commandId"], command_id.as_str());
    assert_eq!(commands[0]["action"], "healthcheck");

    // An immediate second poll has nothing new.
    let empty = post_json(
        &format!("{base}/v1/devices/edge-1/commands/poll"),
        &json!({}),
    )
    .await;
    let empty: Value = empty.json().await.expect("json response");
    assert!(empty["commands"].as_array().expect("commands").is_empty());

    let ack = post_json(
        &format!("{base}/v1/commands/{command_id}/ack"),
        &json!({ "status": "acknowledged", "detail": "ok" }),
    )
    .await;
    assert!(ack.status().is_success());

    let record = get_json(&format!("{base}/v1/commands/{command_id}")).await;
    assert_eq!(record["state"], "acknowledged");
    assert_eq!(record["detail"], "ok");

    // A duplicate ack does not disturb the terminal state.
    let again = post_json(
        &format!("{base}/v1/commands/{command_id}/ack"),
        &json!({ "status": "failed", "detail": "late duplicate" }),
    )
    .await;
    assert!(again.status().is_success());
    let record = get_json(&format!("{base}/v1/commands/{command_id}")).await;
    assert_eq!(record["state"], "acknowledged");

    server.stop().await;
}

#[tokio::test]
async fn already_expired_command_is_reported_and_never_delivered() {
    let server = spawn_server(AuthMode::None).await;
    let base = server.base_url();

    let mut body = command_body("edge-2", "restart");
    body["expiresAt"] = json!((chrono::Utc::now() - chrono::Duration::seconds(30)).to_rfc3339());

    let enqueue = post_json(&format!("{base}/v1/commands"), &body).await;
    assert!(enqueue.status().is_success());
    let enqueue: Value = enqueue.json().await.expect("json response");
    assert_eq!(enqueue["state"], "expired");
    let command_id = enqueue["commandId"].as_str().expect("command id").to_owned();

    let poll = post_json(
        &format!("{base}/v1/devices/edge-2/commands/poll"),
        &json!({}),
    )
    .await;
    let poll: Value = poll.json().await.expect("json response");
    assert!(poll["commands"].as_array().expect("commands").is_empty());

    let record = get_json(&format!("{base}/v1/commands/{command_id}")).await;
    assert_eq!(record["state"], "expired");

    // An ack for an expired command is refused outright.
    let ack = post_json(
        &format!("{base}/v1/commands/{command_id}/ack"),
        &json!({ "status": "acknowledged" }),
    )
    .await;
    assert_eq!(ack.status().as_u16(), 410);

    server.stop().await;
}

#[tokio::test]
async fn unacked_delivery_is_requeued_after_the_deadline() {
    let server = spawn_server(AuthMode::None).await;
    let base = server.base_url();

    let enqueue = post_json(
        &format!("{base}/v1/commands"),
        &command_body("edge-3", "update_config"),
    )
    .await;
    let enqueue: Value = enqueue.json().await.expect("json response");
    let command_id = enqueue["commandId"].as_str().expect("command id").to_owned();

    let poll = post_json(
        &format!("{base}/v1/devices/edge-3/commands/poll"),
        &json!({}),
    )
    .await;
    let poll: Value = poll.json().await.expect("json response");
    assert_eq!(poll["commands"].as_array().expect("commands").len(), 1);

    // Test config: ack timeout 400ms, sweep every 100ms. Give the sweeper
    // room to requeue the silent delivery.
    tokio::time::sleep(Duration::from_millis(700)).await;

    let redelivered = post_json(
        &format!("{base}/v1/devices/edge-3/commands/poll"),
        &json!({}),
    )
    .await;
    let redelivered: Value = redelivered.json().await.expect("json response");
    let commands = redelivered["commands"].as_array().expect("commands");
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0]["commandId"], command_id.as_str());

    server.stop().await;
}

#[tokio::test]
async fn unknown_command_operations_return_not_found() {
    let server = spawn_server(AuthMode::None).await;
    let base = server.base_url();

    let ack = post_json(
        &format!("{base}/v1/commands/cmd-missing/ack"),
        &json!({ "status": "acknowledged" }),
    )
    .await;
    assert_eq!(ack.status().as_u16(), 404);

    let get = reqwest::get(format!("{base}/v1/commands/cmd-missing"))
        .await
        .expect("request sent");
    assert_eq!(get.status().as_u16(), 404);

    server.stop().await;
}

#[tokio::test]
async fn invalid_enqueue_requests_are_refused() {
    let server = spawn_server(AuthMode::None).await;
    let base = server.base_url();

    let bad_action = post_json(
        &format!("{base}/v1/commands"),
        &command_body("edge-4", "self_destruct"),
    )
    .await;
    assert_eq!(bad_action.status().as_u16(), 400);

    let no_device = post_json(&format!("{base}/v1/commands"), &command_body("", "restart")).await;
    assert_eq!(no_device.status().as_u16(), 400);

    server.stop().await;
}

#[tokio::test]
async fn polling_devices_show_up_in_the_session_list() {
    let server = spawn_server(AuthMode::None).await;
    let base = server.base_url();

    let _ = post_json(
        &format!("{base}/v1/devices/edge-5/commands/poll"),
        &json!({}),
    )
    .await;

    let devices = get_json(&format!("{base}/v1/devices")).await;
    let devices = devices["devices"].as_array().expect("devices array");
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["deviceId"], "edge-5");
    assert_eq!(devices[0]["connectionMode"], "polling");

    let device = get_json(&format!("{base}/v1/devices/edge-5")).await;
    assert_eq!(device["offline"], false);

    let missing = reqwest::get(format!("{base}/v1/devices/edge-none"))
        .await
        .expect("request sent");
    assert_eq!(missing.status().as_u16(), 404);

    server.stop().await;
}
