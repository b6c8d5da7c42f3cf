//! Client-side episode availability, airing, playback position and resume
//! state for an anime streaming client, backed by a persistent key-value store.

pub mod backend;
pub mod cache;
pub mod config;
pub mod episodes;
pub mod logging;
pub mod player;
pub mod reconcile;

#[cfg(test)]
mod testing;
