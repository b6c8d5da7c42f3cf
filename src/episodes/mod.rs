//! Episode and playback state caches built on the expiring cache.

mod airing;
mod availability;
mod filters;
pub mod keys;
mod last_watched;
pub mod locator;
mod playback;
mod service;

pub use airing::{airing_ttl, countdown, AiringCache, Countdown};
pub use availability::{availability_ttl, Availability, AvailabilityCache};
pub use filters::{FilterStore, SelectedFilters};
pub use last_watched::{resume_horizon, LastWatched, ResumeCandidate};
pub use playback::PlaybackPositions;
pub use service::EpisodeCacheService;
