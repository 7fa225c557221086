use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use quieteye_relay::application::config::AuthMode;
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;

use super::support::{WsStream, command_body, connect_push, get_json, post_json, spawn_server};

async fn recv_json(ws: &mut WsStream) -> Value {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame should arrive in time")
            .expect("stream should stay open");
        let message = next.expect("websocket stream should remain valid");
        match message {
            Message::Text(text) => {
                return serde_json::from_str(text.as_ref()).expect("json payload expected");
            }
            Message::Ping(payload) => {
                ws.send(Message::Pong(payload)).await.expect("pong sends");
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn command_is_pushed_and_acked_over_the_socket() {
    let server = spawn_server(AuthMode::None).await;
    let base = server.base_url();

    let mut ws = connect_push(server.addr, "edge-ws").await;

    let enqueue = post_json(
        &format!("{base}/v1/commands"),
        &command_body("edge-ws", "healthcheck"),
    )
    .await;
    let enqueue: Value = enqueue.json().await.expect("json response");
    let command_id = enqueue["commandId"].as_str().expect("command id").to_owned();

    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["type"], "command");
    assert_eq!(frame["command"]["commandId"], command_id.as_str());
    assert_eq!(frame["command"]["action"], "healthcheck");

    // The pushed command is marked delivered; polling returns nothing.
    let poll = post_json(
        &format!("{base}/v1/devices/edge-ws/commands/poll"),
        &json!({}),
    )
    .await;
    let poll: Value = poll.json().await.expect("json response");
    assert!(poll["commands"].as_array().expect("commands").is_empty());

    let ack = json!({
        "type": "ack",
        "commandId": command_id,
        "status": "acknowledged",
        "detail": "done"
    });
    ws.send(Message::Text(ack.to_string().into()))
        .await
        .expect("ack frame sends");

    // The ack lands asynchronously; give the handler a moment.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let record = get_json(&format!("{base}/v1/commands/{command_id}")).await;
        if record["state"] == "acknowledged" {
            assert_eq!(record["detail"], "done");
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "command never reached acknowledged: {record}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    ws.close(None).await.expect("socket closes");
    server.stop().await;
}

#[tokio::test]
async fn queued_backlog_flushes_when_the_socket_opens() {
    let server = spawn_server(AuthMode::None).await;
    let base = server.base_url();

    // Enqueue before any connection exists.
    let enqueue = post_json(
        &format!("{base}/v1/commands"),
        &command_body("edge-late", "restart"),
    )
    .await;
    let enqueue: Value = enqueue.json().await.expect("json response");
    assert_eq!(enqueue["state"], "queued");
    let command_id = enqueue["commandId"].as_str().expect("command id").to_owned();

    let mut ws = connect_push(server.addr, "edge-late").await;
    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["type"], "command");
    assert_eq!(frame["command"]["commandId"], command_id.as_str());

    ws.close(None).await.expect("socket closes");
    server.stop().await;
}

#[tokio::test]
async fn push_connection_flips_the_session_mode() {
    let server = spawn_server(AuthMode::None).await;
    let base = server.base_url();

    let mut ws = connect_push(server.addr, "edge-mode").await;
    ws.send(Message::Ping(Vec::new().into()))
        .await
        .expect("ping sends");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let devices = get_json(&format!("{base}/v1/devices")).await;
        let devices = devices["devices"].as_array().expect("devices array");
        if devices
            .iter()
            .any(|d| d["deviceId"] == "edge-mode" && d["connectionMode"] == "push")
        {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "session never switched to push: {devices:?}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    ws.close(None).await.expect("socket closes");
    server.stop().await;
}

#[tokio::test]
async fn reconnect_keeps_the_new_push_channel_alive() {
    let server = spawn_server(AuthMode::None).await;
    let base = server.base_url();

    let mut first = connect_push(server.addr, "edge-again").await;
    let mut second = connect_push(server.addr, "edge-again").await;

    // Registering the second socket replaces the first one's sender, so
    // the server closes the first socket. Wait for that teardown to run
    // before enqueueing; it must not take the live channel down with it.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let next = tokio::time::timeout(Duration::from_millis(250), first.next()).await;
        match next {
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) => break,
            _ => {}
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "replaced socket was never closed"
        );
    }

    let enqueue = post_json(
        &format!("{base}/v1/commands"),
        &command_body("edge-again", "healthcheck"),
    )
    .await;
    let enqueue: Value = enqueue.json().await.expect("json response");
    let command_id = enqueue["commandId"].as_str().expect("command id").to_owned();

    let frame = recv_json(&mut second).await;
    assert_eq!(frame["type"], "command");
    assert_eq!(frame["command"]["commandId"], command_id.as_str());

    second.close(None).await.expect("socket closes");
    server.stop().await;
}

#[tokio::test]
async fn socket_ack_leaves_the_session_in_push_mode() {
    let server = spawn_server(AuthMode::None).await;
    let base = server.base_url();

    let mut ws = connect_push(server.addr, "edge-push-ack").await;

    let enqueue = post_json(
        &format!("{base}/v1/commands"),
        &command_body("edge-push-ack", "restart"),
    )
    .await;
    let enqueue: Value = enqueue.json().await.expect("json response");
    let command_id = enqueue["commandId"].as_str().expect("command id").to_owned();

    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["type"], "command");

    let ack = json!({
        "type": "ack",
        "commandId": command_id,
        "status": "acknowledged",
        "detail": "done"
    });
    ws.send(Message::Text(ack.to_string().into()))
        .await
        .expect("ack frame sends");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let record = get_json(&format!("{base}/v1/commands/{command_id}")).await;
        if record["state"] == "acknowledged" {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "command never reached acknowledged: {record}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let session = get_json(&format!("{base}/v1/devices/edge-push-ack")).await;
    assert_eq!(session["connectionMode"], "push");

    ws.close(None).await.expect("socket closes");
    server.stop().await;
}

#[tokio::test]
async fn websocket_requires_a_device_id() {
    let server = spawn_server(AuthMode::None).await;

    let refused = tokio_tungstenite::connect_async(format!("ws://{}/ws", server.addr)).await;
    assert!(refused.is_err());

    server.stop().await;
}
