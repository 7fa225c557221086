use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    application::config::EdgeConfig,
    domain::{backoff::RetryBackoff, error::DomainError, models::AlertEvent},
    edge::{
        delivery::{DeliveryClient, HttpTransport},
        inbox::{CommandExecutor, CommandInbox},
        outbox::OutboxQueue,
    },
    protocol::{AckRequest, PollResponse},
    storage::SqliteStore,
};

/// Device-side runtime: owns the local store, the outbox the detector
/// feeds, and the command inbox. `run` drives delivery and polling until
/// cancelled.
pub struct EdgeAgent {
    config: EdgeConfig,
    outbox: OutboxQueue,
    inbox: CommandInbox,
    client: reqwest::Client,
}

impl EdgeAgent {
    pub async fn connect(config: EdgeConfig) -> Result<Self, DomainError> {
        let store = SqliteStore::connect(&config.db_path).await?;
        let outbox = OutboxQueue::new(store.clone(), config.outbox_capacity as usize);
        outbox.recover().await?;
        let inbox = CommandInbox::new(store, config.history_limit);

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| {
                DomainError::Unavailable(format!("failed to build http client: {error}"))
            })?;

        Ok(Self {
            config,
            outbox,
            inbox,
            client,
        })
    }

    /// Handle for local producers (the detection pipeline) to queue alerts.
    #[must_use]
    pub fn outbox(&self) -> &OutboxQueue {
        &self.outbox
    }

    pub async fn enqueue_alert(&self, event: &AlertEvent) -> Result<(), DomainError> {
        self.outbox.enqueue(event).await
    }

    /// Runs the delivery loop and the command poll loop side by side until
    /// the token fires.
    pub async fn run<E: CommandExecutor>(self, executor: E, cancel: CancellationToken) {
        info!(
            "edge agent starting device={} gateway={}",
            self.config.device_id, self.config.gateway_url
        );

        let transport = match HttpTransport::new(
            &self.config.gateway_url,
            self.config.device_token.clone(),
            self.config.request_timeout,
        ) {
            Ok(transport) => transport,
            Err(error) => {
                warn!("edge agent cannot start: {error}");
                return;
            }
        };

        let backoff = RetryBackoff::new(
            self.config.backoff_base,
            self.config.backoff_cap,
            self.config.backoff_jitter,
        );
        let delivery = DeliveryClient::new(
            self.outbox.clone(),
            transport,
            backoff,
            self.config.batch_max_bytes,
        );

        let delivery_cancel = cancel.clone();
        let delivery_task = tokio::spawn(delivery.run(delivery_cancel));

        self.poll_loop(&executor, &cancel).await;

        cancel.cancel();
        // The delivery loop observes the token; wake it if it is parked.
        self.outbox.notify();
        if let Err(error) = delivery_task.await {
            warn!("delivery task ended abnormally: {error}");
        }
        info!("edge agent stopped");
    }

    async fn poll_loop<E: CommandExecutor>(&self, executor: &E, cancel: &CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.poll_once(executor).await {
                Ok(0) => {}
                Ok(handled) => debug!("handled {handled} commands"),
                Err(error) => warn!("command poll failed: {error}"),
            }
        }
    }

    /// One poll round trip: fetch deliverable commands, run each through
    /// the inbox, report the resulting acks.
    pub async fn poll_once<E: CommandExecutor>(&self, executor: &E) -> Result<u64, DomainError> {
        let url = format!(
            "{}/v1/devices/{}/commands/poll",
            self.config.gateway_url, self.config.device_id
        );
        let response = self
            .request(self.client.post(&url))
            .send()
            .await
            .map_err(|error| DomainError::Transient(format!("poll request failed: {error}")))?;

        if !response.status().is_success() {
            return Err(status_error("poll", response.status()));
        }

        let batch = response
            .json::<PollResponse>()
            .await
            .map_err(|error| DomainError::Transient(format!("invalid poll response: {error}")))?;

        let mut handled = 0u64;
        for command in batch.commands {
            let command_id = command.command_id.clone();
            let (status, detail) = self.inbox.receive(executor, &command).await?;
            if let Err(error) = self.send_ack(&command_id, AckRequest { status, detail }).await {
                // The outcome is in history; the next redelivery re-acks.
                warn!("ack for {command_id} failed: {error}");
            }
            handled += 1;
        }

        Ok(handled)
    }

    async fn send_ack(&self, command_id: &str, ack: AckRequest) -> Result<(), DomainError> {
        let url = format!("{}/v1/commands/{command_id}/ack", self.config.gateway_url);
        let response = self
            .request(self.client.post(&url))
            .json(&ack)
            .send()
            .await
            .map_err(|error| DomainError::Transient(format!("ack request failed: {error}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error("ack", response.status()))
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.device_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

fn status_error(operation: &str, status: StatusCode) -> DomainError {
    if status.is_server_error() {
        DomainError::Transient(format!("{operation} returned {status}"))
    } else {
        DomainError::Unavailable(format!("{operation} returned {status}"))
    }
}
