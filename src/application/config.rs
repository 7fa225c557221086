use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Parser, Subcommand};
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(
    name = "quieteye-relay",
    version,
    about = "QuietEye Relay: edge-to-cloud alert delivery and command dispatch"
)]
pub struct Cli {
    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Debug, Subcommand)]
pub enum Mode {
    /// Run the cloud-side gateway (ingress + command dispatch).
    Gateway(GatewayArgs),
    /// Run the edge agent (outbox delivery + command polling).
    Edge(EdgeArgs),
}

#[derive(Debug, Clone, Parser)]
pub struct GatewayArgs {
    #[arg(long, env = "QUIETEYE_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    #[arg(long, env = "QUIETEYE_PORT", default_value_t = 18410)]
    pub port: u16,

    /// Shared device token; unset disables auth.
    #[arg(long, env = "QUIETEYE_DEVICE_TOKEN")]
    pub device_token: Option<String>,

    #[arg(long, env = "QUIETEYE_DB_PATH", default_value = "./.quieteye/gateway.db")]
    pub db_path: PathBuf,

    #[arg(long, env = "QUIETEYE_MAX_SNAPSHOT_BYTES", default_value_t = 512 * 1024)]
    pub max_snapshot_bytes: usize,

    /// Expected device poll cadence; the default ack timeout is twice this.
    #[arg(long, env = "QUIETEYE_POLL_INTERVAL_MS", default_value_t = 5_000)]
    pub poll_interval_ms: u64,

    #[arg(long, env = "QUIETEYE_ACK_TIMEOUT_MS")]
    pub ack_timeout_ms: Option<u64>,

    #[arg(long, env = "QUIETEYE_SWEEP_INTERVAL_MS", default_value_t = 1_000)]
    pub sweep_interval_ms: u64,

    #[arg(long, env = "QUIETEYE_OFFLINE_THRESHOLD_MS", default_value_t = 300_000)]
    pub offline_threshold_ms: u64,

    /// Alert record retention; 0 keeps everything. Anything kept at least
    /// 24h preserves the deduplication window.
    #[arg(long, env = "QUIETEYE_ALERT_RETENTION_MS", default_value_t = 0)]
    pub alert_retention_ms: u64,

    #[arg(long, env = "QUIETEYE_NOTIFY_BUFFER", default_value_t = 256)]
    pub notify_buffer: usize,

    #[arg(long, env = "QUIETEYE_RUNTIME_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    pub runtime_version: String,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,

    #[arg(long, env = "QUIETEYE_JSON_LOGS", default_value_t = false)]
    pub json_logs: bool,
}

#[derive(Debug, Clone, Parser)]
pub struct EdgeArgs {
    #[arg(long, env = "QUIETEYE_GATEWAY_URL", default_value = "http://127.0.0.1:18410")]
    pub gateway_url: String,

    /// Device identity; may instead come from the site config file.
    #[arg(long, env = "QUIETEYE_DEVICE_ID")]
    pub device_id: Option<String>,

    /// TOML site description (site id, device id, cameras).
    #[arg(long, env = "QUIETEYE_SITE_CONFIG")]
    pub site_config: Option<PathBuf>,

    #[arg(long, env = "QUIETEYE_DEVICE_TOKEN")]
    pub device_token: Option<String>,

    #[arg(long, env = "QUIETEYE_EDGE_DB_PATH", default_value = "./.quieteye/edge.db")]
    pub db_path: PathBuf,

    #[arg(long, env = "QUIETEYE_OUTBOX_CAPACITY", default_value_t = 10_000)]
    pub outbox_capacity: u64,

    /// Batch budget for one delivery round; the default fits roughly one
    /// snapshot-bearing alert per request.
    #[arg(long, env = "QUIETEYE_BATCH_MAX_BYTES", default_value_t = 256 * 1024)]
    pub batch_max_bytes: usize,

    #[arg(long, env = "QUIETEYE_REQUEST_TIMEOUT_MS", default_value_t = 10_000)]
    pub request_timeout_ms: u64,

    #[arg(long, env = "QUIETEYE_BACKOFF_BASE_MS", default_value_t = 2_000)]
    pub backoff_base_ms: u64,

    #[arg(long, env = "QUIETEYE_BACKOFF_CAP_MS", default_value_t = 60_000)]
    pub backoff_cap_ms: u64,

    #[arg(long, env = "QUIETEYE_BACKOFF_JITTER_MS", default_value_t = 1_000)]
    pub backoff_jitter_ms: u64,

    #[arg(long, env = "QUIETEYE_POLL_INTERVAL_MS", default_value_t = 5_000)]
    pub poll_interval_ms: u64,

    /// Bound on the executed-command dedup history.
    #[arg(long, env = "QUIETEYE_HISTORY_LIMIT", default_value_t = 1_000)]
    pub history_limit: usize,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,

    #[arg(long, env = "QUIETEYE_JSON_LOGS", default_value_t = false)]
    pub json_logs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    None,
    Token(String),
}

impl AuthMode {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Token(_) => "token",
        }
    }
}

/// Validated gateway configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub host: IpAddr,
    pub port: u16,
    pub auth_mode: AuthMode,
    pub db_path: PathBuf,
    pub max_snapshot_bytes: usize,
    pub poll_interval: Duration,
    pub ack_timeout: Duration,
    pub sweep_interval: Duration,
    pub offline_threshold: Duration,
    pub alert_retention_ms: u64,
    pub notify_buffer: usize,
    pub runtime_version: String,
    pub log_filter: String,
    pub json_logs: bool,
}

impl RuntimeConfig {
    pub fn from_args(args: GatewayArgs) -> Result<Self, String> {
        if args.port == 0 {
            return Err("port must be greater than 0".to_owned());
        }
        if args.max_snapshot_bytes == 0 {
            return Err("max_snapshot_bytes must be greater than 0".to_owned());
        }
        if args.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".to_owned());
        }
        if args.notify_buffer == 0 {
            return Err("notify_buffer must be greater than 0".to_owned());
        }
        if args.sweep_interval_ms == 0 {
            return Err("sweep_interval_ms must be greater than 0".to_owned());
        }

        let ack_timeout_ms = match args.ack_timeout_ms {
            Some(0) => return Err("ack_timeout_ms must be greater than 0".to_owned()),
            Some(value) => value,
            None => args.poll_interval_ms.saturating_mul(2),
        };

        Ok(Self {
            host: args.host,
            port: args.port,
            auth_mode: resolve_auth_mode(args.device_token),
            db_path: args.db_path,
            max_snapshot_bytes: args.max_snapshot_bytes,
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            ack_timeout: Duration::from_millis(ack_timeout_ms),
            sweep_interval: Duration::from_millis(args.sweep_interval_ms),
            offline_threshold: Duration::from_millis(args.offline_threshold_ms),
            alert_retention_ms: args.alert_retention_ms,
            notify_buffer: args.notify_buffer,
            runtime_version: args.runtime_version,
            log_filter: args.log_filter,
            json_logs: args.json_logs,
        })
    }

    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    #[must_use]
    pub fn for_test(host: IpAddr, port: u16, db_path: PathBuf) -> Self {
        Self {
            host,
            port,
            auth_mode: AuthMode::None,
            db_path,
            max_snapshot_bytes: 64 * 1024,
            poll_interval: Duration::from_millis(200),
            ack_timeout: Duration::from_millis(400),
            sweep_interval: Duration::from_millis(100),
            offline_threshold: Duration::from_millis(5_000),
            alert_retention_ms: 0,
            notify_buffer: 16,
            runtime_version: "test".to_owned(),
            log_filter: "warn".to_owned(),
            json_logs: false,
        }
    }
}

/// Validated edge agent configuration.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub gateway_url: String,
    pub device_id: String,
    pub site_id: Option<String>,
    pub device_token: Option<String>,
    pub db_path: PathBuf,
    pub outbox_capacity: u64,
    pub batch_max_bytes: usize,
    pub request_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub backoff_jitter: Duration,
    pub poll_interval: Duration,
    pub history_limit: usize,
    pub log_filter: String,
    pub json_logs: bool,
}

impl EdgeConfig {
    pub fn from_args(args: EdgeArgs) -> Result<Self, String> {
        let site = args
            .site_config
            .as_deref()
            .map(SiteConfig::load)
            .transpose()?;

        let device_id = args
            .device_id
            .or_else(|| site.as_ref().map(|site| site.device_id.clone()))
            .ok_or_else(|| "device_id is required (flag, env, or site config)".to_owned())?;
        if device_id.trim().is_empty() {
            return Err("device_id must not be empty".to_owned());
        }
        if args.gateway_url.trim().is_empty() {
            return Err("gateway_url must not be empty".to_owned());
        }
        if args.outbox_capacity == 0 {
            return Err("outbox_capacity must be greater than 0".to_owned());
        }
        if args.batch_max_bytes == 0 {
            return Err("batch_max_bytes must be greater than 0".to_owned());
        }
        if args.history_limit == 0 {
            return Err("history_limit must be greater than 0".to_owned());
        }
        if args.backoff_base_ms == 0 || args.backoff_cap_ms < args.backoff_base_ms {
            return Err("backoff cap must be at least the base".to_owned());
        }

        Ok(Self {
            gateway_url: args.gateway_url.trim_end_matches('/').to_owned(),
            device_id,
            site_id: site.map(|site| site.site_id),
            device_token: normalize_secret(args.device_token),
            db_path: args.db_path,
            outbox_capacity: args.outbox_capacity,
            batch_max_bytes: args.batch_max_bytes,
            request_timeout: Duration::from_millis(args.request_timeout_ms),
            backoff_base: Duration::from_millis(args.backoff_base_ms),
            backoff_cap: Duration::from_millis(args.backoff_cap_ms),
            backoff_jitter: Duration::from_millis(args.backoff_jitter_ms),
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            history_limit: args.history_limit,
            log_filter: args.log_filter,
            json_logs: args.json_logs,
        })
    }

    #[must_use]
    pub fn for_test(gateway_url: String, device_id: String, db_path: PathBuf) -> Self {
        Self {
            gateway_url: gateway_url.trim_end_matches('/').to_owned(),
            device_id,
            site_id: None,
            device_token: None,
            db_path,
            outbox_capacity: 100,
            batch_max_bytes: 64 * 1024,
            request_timeout: Duration::from_millis(2_000),
            backoff_base: Duration::from_millis(20),
            backoff_cap: Duration::from_millis(100),
            backoff_jitter: Duration::ZERO,
            poll_interval: Duration::from_millis(100),
            history_limit: 50,
            log_filter: "warn".to_owned(),
            json_logs: false,
        }
    }
}

/// Site description as carried on the device, mirroring the shape of the
/// camera inventory file.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    pub site_id: String,
    pub device_id: String,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub camera_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub rtsp_url: String,
    #[serde(default)]
    pub zones: Vec<String>,
}

impl SiteConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|error| format!("failed to read site config {}: {error}", path.display()))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        let site: Self =
            toml::from_str(text).map_err(|error| format!("invalid site config: {error}"))?;
        if site.site_id.trim().is_empty() {
            return Err("site config must include site_id".to_owned());
        }
        if site.device_id.trim().is_empty() {
            return Err("site config must include device_id".to_owned());
        }
        for camera in &site.cameras {
            if camera.camera_id.trim().is_empty() || camera.rtsp_url.trim().is_empty() {
                return Err("each camera must have camera_id and rtsp_url".to_owned());
            }
        }
        Ok(site)
    }
}

fn normalize_secret(input: Option<String>) -> Option<String> {
    input.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    })
}

fn resolve_auth_mode(token: Option<String>) -> AuthMode {
    match normalize_secret(token) {
        Some(token) => AuthMode::Token(token),
        None => AuthMode::None,
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthMode, SiteConfig, resolve_auth_mode};

    #[test]
    fn auth_mode_trims_input() {
        assert_eq!(
            resolve_auth_mode(Some(" token ".to_owned())),
            AuthMode::Token("token".to_owned())
        );
        assert_eq!(resolve_auth_mode(Some("  ".to_owned())), AuthMode::None);
    }

    #[test]
    fn site_config_parses_cameras() {
        let site = SiteConfig::parse(
            r#"
            site_id = "hq"
            device_id = "edge-1"

            [[cameras]]
            camera_id = "cam-1"
            name = "Lobby"
            rtsp_url = "rtsp://10.0.0.5/stream"
            zones = ["entrance"]
            "#,
        )
        .expect("valid site config");

        assert_eq!(site.device_id, "edge-1");
        assert_eq!(site.cameras.len(), 1);
        assert_eq!(site.cameras[0].zones, vec!["entrance".to_owned()]);
    }

    #[test]
    fn site_config_requires_identity_fields() {
        let result = SiteConfig::parse("site_id = \"\"\ndevice_id = \"edge-1\"");
        assert!(result.is_err());
    }
}
