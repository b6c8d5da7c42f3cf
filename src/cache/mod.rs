//! Generic expiring cache for client-side state.
//!
//! This module provides a domain-agnostic caching mechanism that:
//! - Stores typed values as JSON under caller-chosen keys with a TTL
//! - Evicts expired and corrupt entries lazily on read
//! - Supports atomic multi-entry writes through the storage backend
//! - Provides basic offline mode (serve stale cache when revalidation fails)

pub mod clock;
mod layer;
pub mod storage;
mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use layer::{expiry_key, ExpiringCache, EXPIRY_SUFFIX};
pub use storage::{KvStorage, MemoryStorage, SqliteStorage, WriteOp};
pub use traits::{CacheEntry, CacheResult, CacheSource, Revalidation};
