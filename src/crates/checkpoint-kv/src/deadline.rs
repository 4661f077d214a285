//! Caller-supplied operation deadlines

use crate::error::{CheckpointError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Point in time by which an operation must finish.
///
/// Measured on the tokio clock, so paused-time tests control it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// The earlier of two optional deadlines
    pub fn earliest(a: Option<Deadline>, b: Option<Deadline>) -> Option<Deadline> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Run `fut` to completion or fail with `DeadlineExceeded` once `deadline` passes.
///
/// Dropping the inner future on expiry cancels any backend call in flight.
pub async fn with_deadline<F, T>(deadline: Option<Deadline>, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        None => fut.await,
        Some(deadline) => match tokio::time::timeout_at(deadline.instant(), fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, "deadline exceeded");
                Err(CheckpointError::DeadlineExceeded {
                    operation: operation.to_string(),
                })
            }
        },
    }
}
