use std::future::Future;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    application::{
        config::{EdgeConfig, GatewayArgs, RuntimeConfig},
        state::SharedState,
    },
    domain::error::DomainError,
    edge::{agent::EdgeAgent, inbox::DefaultExecutor},
    interfaces::http,
};

pub async fn run_gateway(args: GatewayArgs) -> Result<(), DomainError> {
    let config = RuntimeConfig::from_args(args)
        .map_err(|error| DomainError::Validation(format!("configuration error: {error}")))?;

    init_logging(&config.log_filter, config.json_logs)?;
    let listener = TcpListener::bind(config.bind_addr())
        .await
        .map_err(|error| DomainError::Unavailable(format!("failed to bind listener: {error}")))?;

    let signal = shutdown_signal();
    run_gateway_with_listener(listener, config, signal).await
}

pub async fn run_gateway_with_listener(
    listener: TcpListener,
    config: RuntimeConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DomainError> {
    info!(
        "starting quieteye gateway host={} port={} auth_mode={}",
        config.host,
        config.port,
        config.auth_mode.label()
    );

    let state = SharedState::new(config).await?;
    let sweeper = spawn_command_sweeper(state.clone());
    let serve_result = http::serve(listener, state, shutdown).await;

    sweeper.abort();
    let _ = sweeper.await;
    serve_result
}

pub async fn run_edge(args: crate::application::config::EdgeArgs) -> Result<(), DomainError> {
    let config = EdgeConfig::from_args(args)
        .map_err(|error| DomainError::Validation(format!("configuration error: {error}")))?;

    init_logging(&config.log_filter, config.json_logs)?;
    info!(
        "starting quieteye edge agent device={} gateway={}",
        config.device_id, config.gateway_url
    );

    let agent = EdgeAgent::connect(config).await?;
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    agent.run(DefaultExecutor, cancel).await;
    Ok(())
}

fn init_logging(filter: &str, json_logs: bool) -> Result<(), DomainError> {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(env_filter).with_target(false);

    if json_logs {
        builder.json().try_init().map_err(|error| {
            DomainError::Unavailable(format!("failed to initialize logger: {error}"))
        })?;
    } else {
        builder.compact().try_init().map_err(|error| {
            DomainError::Unavailable(format!("failed to initialize logger: {error}"))
        })?;
    }

    Ok(())
}

/// Periodic dispatcher sweep: requeues delivery timeouts, expires overdue
/// commands, and applies alert retention.
fn spawn_command_sweeper(state: SharedState) -> tokio::task::JoinHandle<()> {
    let interval = state.config().sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(error) = state.sweep_commands().await {
                error!("command sweep failed: {error}");
            }
            if let Err(error) = state.prune_alerts().await {
                error!("alert prune failed: {error}");
            }
        }
    })
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
