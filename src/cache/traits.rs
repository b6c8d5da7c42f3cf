//! Core types for the caching system.

use chrono::{DateTime, Duration, Utc};

/// A cached value together with its expiry bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
  pub value: T,
  /// Instant after which the value must be revalidated
  pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
  /// `now >= stored_at + ttl`, with `expires_at` holding `stored_at + ttl`.
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }

  /// Remaining lifetime, zero once expired.
  pub fn time_to_live(&self, now: DateTime<Utc>) -> Duration {
    (self.expires_at - now).max(Duration::zero())
  }
}

/// A value handed out by a cache-first read, tagged with how it was obtained.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// When the cached copy expires (if from cache)
  pub expires_at: Option<DateTime<Utc>>,
  /// Why revalidation failed, when serving a stale copy
  pub revalidation_error: Option<String>,
}

impl<T> CacheResult<T> {
  /// Just fetched from the backend.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      expires_at: None,
      revalidation_error: None,
    }
  }

  /// Served from a cache entry still inside its TTL.
  pub fn from_cache(data: T, expires_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      expires_at: Some(expires_at),
      revalidation_error: None,
    }
  }

  /// Served from an expired entry because revalidation failed.
  pub fn offline(data: T, expires_at: DateTime<Utc>, error: impl ToString) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      expires_at: Some(expires_at),
      revalidation_error: Some(error.to_string()),
    }
  }

  pub fn is_fresh(&self) -> bool {
    self.source != CacheSource::Offline
  }
}

/// Provenance of a `CacheResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  Network,
  /// Data from cache, still within its TTL
  CacheFresh,
  /// Revalidation failed, serving the expired copy
  Offline,
}

/// Decides whether a failed revalidation may fall back to the stale copy.
pub trait Revalidation {
  /// `true` when the last-known value should be served despite the failure.
  fn keeps_stale(&self) -> bool;
}
