use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    domain::{backoff::RetryBackoff, error::DomainError, models::AlertEvent},
    edge::outbox::OutboxQueue,
    protocol::{SubmitAlertResponse, SubmitStatus},
};

/// Uplink seam for the delivery client. The production implementation is
/// HTTP; tests script outcomes per attempt.
pub trait AlertTransport: Send + Sync {
    fn submit(
        &self,
        event: &AlertEvent,
    ) -> impl Future<Output = Result<SubmitAlertResponse, DomainError>> + Send;
}

pub struct HttpTransport {
    client: reqwest::Client,
    alerts_url: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(
        gateway_url: &str,
        token: Option<String>,
        request_timeout: std::time::Duration,
    ) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| {
                DomainError::Unavailable(format!("failed to build http client: {error}"))
            })?;

        Ok(Self {
            client,
            alerts_url: format!("{gateway_url}/v1/alerts"),
            token,
        })
    }
}

impl AlertTransport for HttpTransport {
    async fn submit(&self, event: &AlertEvent) -> Result<SubmitAlertResponse, DomainError> {
        let mut request = self.client.post(&self.alerts_url).json(event);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|error| {
            DomainError::Transient(format!("alert upload failed: {error}"))
        })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<SubmitAlertResponse>()
                .await
                .map_err(|error| {
                    DomainError::Transient(format!("invalid gateway response: {error}"))
                });
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::BAD_REQUEST => DomainError::Validation(body),
            StatusCode::PAYLOAD_TOO_LARGE => DomainError::PayloadTooLarge(body),
            StatusCode::UNAUTHORIZED => DomainError::Unauthorized(body),
            status if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
                DomainError::Transient(format!("gateway returned {status}: {body}"))
            }
            status => DomainError::Validation(format!("gateway returned {status}: {body}")),
        })
    }
}

/// Drains the outbox toward the gateway. One attempt at a time, oldest
/// first; a transient failure requeues the entry and pauses the whole loop
/// so ordering is preserved across retries.
pub struct DeliveryClient<T> {
    queue: OutboxQueue,
    transport: T,
    backoff: RetryBackoff,
    batch_max_bytes: usize,
}

impl<T: AlertTransport> DeliveryClient<T> {
    #[must_use]
    pub fn new(
        queue: OutboxQueue,
        transport: T,
        backoff: RetryBackoff,
        batch_max_bytes: usize,
    ) -> Self {
        Self {
            queue,
            transport,
            backoff,
            batch_max_bytes,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("delivery client started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.drain_once().await {
                Ok(0) => {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = self.queue.wait_for_work() => {}
                    }
                }
                Ok(delivered) => {
                    debug!("delivered {delivered} alerts");
                }
                Err(error) => {
                    let delay = self.backoff.next_sleep();
                    warn!(
                        "delivery attempt failed (retry in {}ms, failures={}): {error}",
                        delay.as_millis(),
                        self.backoff.failures()
                    );
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        info!("delivery client stopped");
    }

    /// Attempts one batch. Returns the number delivered, or the transient
    /// error that interrupted the batch.
    pub async fn drain_once(&mut self) -> Result<u64, DomainError> {
        let batch = self.queue.peek_batch(self.batch_max_bytes).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut delivered = 0u64;
        for entry in batch {
            let alert_id = entry.event.alert_id.clone();
            if !self.queue.mark_in_flight(&alert_id).await? {
                // Raced with another pass; skip quietly.
                continue;
            }

            match self.transport.submit(&entry.event).await {
                Ok(response) => {
                    if matches!(response.status, SubmitStatus::Duplicate) {
                        debug!("gateway already had alert {alert_id}");
                    }
                    self.queue.acknowledge(&alert_id).await?;
                    self.backoff.reset();
                    delivered += 1;
                }
                Err(error) if error.is_transient() => {
                    self.queue.requeue(&alert_id).await?;
                    return Err(error);
                }
                Err(error) => {
                    warn!("alert {alert_id} rejected, dead-lettering: {error}");
                    self.queue.dead_letter(&alert_id, &error.to_string()).await?;
                }
            }
        }

        Ok(delivered)
    }
}
