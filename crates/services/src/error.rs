//! Error taxonomy for the delivery pipeline (spec §7).
//!
//! These are *kinds*, not a single flat error type: `IngestError` surfaces
//! synchronously to the caller of `Ingest::receive`, while `DispatchError`
//! is only ever observed via log lines and message-row inspection — per
//! spec, Dispatcher never lets a `Store`/`Bus` failure mutate state beyond
//! what already committed.

use thiserror::Error;

/// Errors `Ingest::receive` can return to its caller. These correspond to
/// spec's `ValidationFailure` kind; never retried.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("webhook config '{0}' not found or inactive")]
    NotFound(String),

    #[error("payload rejected: {0}")]
    PayloadRejected(String),

    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An admin operation was requested against a message not in the state
    /// it requires (e.g. retrying a message that is `PROCESSING`).
    #[error("invalid message state: {0}")]
    InvalidState(String),
}

/// Errors observed while dispatching a single message. Not returned to any
/// external caller — `Dispatcher::dispatch` logs these and returns,
/// leaving the message row to tell the story on the next inspection.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Repository error. No attempt is appended; the message remains
    /// `PROCESSING` until the zombie sweep reclaims it.
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    /// An assertion about the message's state was violated (e.g. the
    /// config backing a claimed message vanished mid-dispatch).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Bus publish/subscribe failures. Publish failures on the enqueue path
/// are logged and leave the message `PENDING` for `RetryScheduler` to
/// pick up; subscribe failures trigger reconnection at the bus layer.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
}
