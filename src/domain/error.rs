use thiserror::Error;

/// Error taxonomy for the relay. `Duplicate` is intentionally absent: a
/// retransmission is a success with a distinguishing status, not an error.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("capacity exceeded: {0}")]
    Capacity(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("expired: {0}")]
    Expired(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl DomainError {
    /// Transient failures are retried with backoff; everything else is
    /// terminal for the item that produced it.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Storage(_) | Self::Unavailable(_)
        )
    }
}
