//! Per-call deadlines for store operations.

use std::future::Future;
use std::time::Duration;

use strongroom_common::{Error, Result};

/// Upper bound applied to every store call a service makes.
///
/// Cancellation needs nothing extra: dropping the service future drops the
/// in-flight store future with it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreDeadline {
    limit: Option<Duration>,
}

impl StoreDeadline {
    /// Bound each call by `limit`.
    pub fn new(limit: Duration) -> Self {
        Self { limit: Some(limit) }
    }

    /// No bound.
    pub fn none() -> Self {
        Self { limit: None }
    }

    /// The configured bound, if any.
    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }

    /// Run `call`, failing with `Store` if it outlives the deadline.
    pub async fn run<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.limit {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                Error::Store(format!("{} timed out after {:?}", operation, limit))
            })?,
            None => call.await,
        }
    }
}
