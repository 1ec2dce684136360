use thiserror::Error;

/// Ingestion failure taxonomy. The variant decides the HTTP response:
/// `Auth` -> 401, `Validation` -> 200 no-op ack (stops provider retry
/// storms for malformed pings), `Unavailable` -> dead-letter + 503 so the
/// provider retries the whole event on its own schedule.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("signature rejected")]
    Auth,

    #[error("invalid payload: {0}")]
    Validation(String),

    #[error("storage unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}
