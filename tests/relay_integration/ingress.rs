use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use quieteye_relay::application::config::AuthMode;
use serde_json::{Value, json};

use super::support::{alert_body, get_json, post_json, spawn_server};

#[tokio::test]
async fn healthz_endpoint_returns_ok_payload() {
    let server = spawn_server(AuthMode::None).await;

    let payload = get_json(&format!("{}/healthz", server.base_url())).await;
    assert_eq!(payload["ok"], true);
    assert_eq!(payload["version"], "test");

    server.stop().await;
}

#[tokio::test]
async fn repeated_submission_yields_one_record() {
    let server = spawn_server(AuthMode::None).await;
    let url = format!("{}/v1/alerts", server.base_url());
    let body = alert_body("alert-1", "edge-1");

    let first = post_json(&url, &body).await;
    assert!(first.status().is_success());
    let first: Value = first.json().await.expect("json response");
    assert_eq!(first["status"], "received");
    assert_eq!(first["alertId"], "alert-1");

    for _ in 0..3 {
        let retry = post_json(&url, &body).await;
        assert!(retry.status().is_success());
        let retry: Value = retry.json().await.expect("json response");
        assert_eq!(retry["status"], "duplicate");
    }

    let listed = get_json(&format!("{url}?deviceId=edge-1")).await;
    let alerts = listed["alerts"].as_array().expect("alerts array");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["alertId"], "alert-1");
    assert_eq!(alerts[0]["eventType"], "intrusion");

    server.stop().await;
}

#[tokio::test]
async fn invalid_alert_is_refused_and_not_persisted() {
    let server = spawn_server(AuthMode::None).await;
    let url = format!("{}/v1/alerts", server.base_url());

    let mut body = alert_body("", "edge-1");
    body["alertId"] = json!("");
    let response = post_json(&url, &body).await;
    assert_eq!(response.status().as_u16(), 400);
    let error: Value = response.json().await.expect("error body");
    assert_eq!(error["code"], "VALIDATION");

    let confidence = post_json(&url, &{
        let mut body = alert_body("alert-odd", "edge-1");
        body["confidence"] = json!(1.5);
        body
    })
    .await;
    assert_eq!(confidence.status().as_u16(), 400);

    let listed = get_json(&format!("{url}?deviceId=edge-1")).await;
    assert!(listed["alerts"].as_array().expect("alerts array").is_empty());

    server.stop().await;
}

#[tokio::test]
async fn oversized_snapshot_is_refused() {
    let server = spawn_server(AuthMode::None).await;
    let url = format!("{}/v1/alerts", server.base_url());

    // Test config caps snapshots at 64 KiB.
    let mut body = alert_body("alert-big", "edge-1");
    body["snapshot"] = json!(STANDARD.encode(vec![0u8; 80 * 1024]));

    let response = post_json(&url, &body).await;
    assert_eq!(response.status().as_u16(), 413);
    let error: Value = response.json().await.expect("error body");
    assert_eq!(error["code"], "PAYLOAD_TOO_LARGE");

    server.stop().await;
}

#[tokio::test]
async fn token_auth_guards_the_ingress() {
    let server = spawn_server(AuthMode::Token("sekrit".to_owned())).await;
    let url = format!("{}/v1/alerts", server.base_url());
    let body = alert_body("alert-auth", "edge-1");
    let client = reqwest::Client::new();

    let missing = client
        .post(&url)
        .json(&body)
        .send()
        .await
        .expect("request sent");
    assert_eq!(missing.status().as_u16(), 401);

    let wrong = client
        .post(&url)
        .bearer_auth("nope")
        .json(&body)
        .send()
        .await
        .expect("request sent");
    assert_eq!(wrong.status().as_u16(), 401);

    let right = client
        .post(&url)
        .bearer_auth("sekrit")
        .json(&body)
        .send()
        .await
        .expect("request sent");
    assert!(right.status().is_success());

    server.stop().await;
}

#[tokio::test]
async fn snapshot_round_trips_through_the_record() {
    let server = spawn_server(AuthMode::None).await;
    let url = format!("{}/v1/alerts", server.base_url());

    let snapshot = STANDARD.encode(b"jpeg bytes");
    let mut body = alert_body("alert-snap", "edge-1");
    body["snapshot"] = json!(snapshot);

    let response = post_json(&url, &body).await;
    assert!(response.status().is_success());

    let listed = get_json(&format!("{url}?deviceId=edge-1")).await;
    let alerts = listed["alerts"].as_array().expect("alerts array");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["snapshot"], json!(snapshot));

    let record = get_json(&format!("{url}/alert-snap")).await;
    assert_eq!(record["snapshot"], json!(snapshot));

    let missing = reqwest::get(format!("{url}/alert-none"))
        .await
        .expect("request sent");
    assert_eq!(missing.status().as_u16(), 404);

    server.stop().await;
}
