use thiserror::Error;

use crate::cache::Revalidation;

/// Failure at the network boundary.
#[derive(Debug, Error)]
pub enum BackendError {
  /// The request never produced a response (connection refused, DNS, reset).
  #[error("request to {endpoint} failed: {source}")]
  Transport {
    endpoint: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("request to {endpoint} timed out")]
  Timeout { endpoint: String },

  /// Non-2xx response. `message` comes from the `{error}` body when present.
  #[error("{endpoint} returned {status}: {message}")]
  Status {
    endpoint: String,
    status: u16,
    message: String,
  },

  /// The response arrived but its shape is not what the client relies on.
  #[error("invalid response from {endpoint}: {reason}")]
  Validation { endpoint: String, reason: String },
}

impl BackendError {
  pub fn validation(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::Validation {
      endpoint: endpoint.into(),
      reason: reason.into(),
    }
  }

  /// Transient failures leave caches at their last-known value and may be retried.
  pub fn is_transient(&self) -> bool {
    !matches!(self, Self::Validation { .. })
  }

  pub fn is_validation(&self) -> bool {
    matches!(self, Self::Validation { .. })
  }
}

pub type BackendResult<T> = Result<T, BackendError>;

impl Revalidation for BackendError {
  fn keeps_stale(&self) -> bool {
    self.is_transient()
  }
}
