use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use quieteye_relay::application::{
    config::{AuthMode, RuntimeConfig},
    startup,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub(crate) struct ServerHandle {
    pub(crate) addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
    _temp_dir: TempDir,
}

impl ServerHandle {
    pub(crate) fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = self.join.await;
    }
}

pub(crate) async fn spawn_server(auth_mode: AuthMode) -> ServerHandle {
    spawn_server_with(auth_mode, |_: &mut RuntimeConfig| {}).await
}

pub(crate) async fn spawn_server_with(
    auth_mode: AuthMode,
    configure: impl FnOnce(&mut RuntimeConfig),
) -> ServerHandle {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("listener should bind");
    let addr = listener
        .local_addr()
        .expect("listener should expose local addr");

    let temp_dir = tempfile::tempdir().expect("temp dir should be created");
    let db_path = temp_dir.path().join("gateway.db");

    let mut config = RuntimeConfig::for_test(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port(), db_path);
    config.auth_mode = auth_mode;
    configure(&mut config);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let join = tokio::spawn(async move {
        let _ = startup::run_gateway_with_listener(listener, config, async {
            let _ = shutdown_rx.await;
        })
        .await;
    });

    ServerHandle {
        addr,
        shutdown: Some(shutdown_tx),
        join,
        _temp_dir: temp_dir,
    }
}

pub(crate) fn alert_body(alert_id: &str, device_id: &str) -> Value {
    json!({
        "alertId": alert_id,
        "deviceId": device_id,
        "siteId": "site-1",
        "cameraId": "cam-entrance",
        "zone": "gate",
        "eventType": "intrusion",
        "confidence": 0.93,
        "coordinates": { "x": 0.1, "y": 0.2, "width": 0.3, "height": 0.4 },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "extra": { "trackId": 7 }
    })
}

pub(crate) fn command_body(device_id: &str, action: &str) -> Value {
    json!({
        "deviceId": device_id,
        "action": action,
        "params": { "reason": "test" }
    })
}

pub(crate) async fn post_json(url: &str, body: &Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(url)
        .json(body)
        .send()
        .await
        .expect("request should be sent")
}

pub(crate) async fn get_json(url: &str) -> Value {
    let response = reqwest::get(url).await.expect("request should be sent");
    assert!(
        response.status().is_success(),
        "GET {url} returned {}",
        response.status()
    );
    response.json().await.expect("response should be json")
}

pub(crate) async fn connect_push(addr: SocketAddr, device_id: &str) -> WsStream {
    let (socket, _) = connect_async(format!("ws://{addr}/ws?deviceId={device_id}"))
        .await
        .expect("websocket should connect");
    socket
}
