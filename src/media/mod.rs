//! Media lookup: resolving `(artist, track, audio|video)` to a playable upload.

/// Durable cache orchestration and maintenance.
pub mod cache;
/// Sweep planning.
pub mod eviction;
/// Process-local lookup deduplication.
pub mod inflight;
/// Cache key normalization.
pub mod key;
/// Provider query strategies and match scoring.
pub mod resolver;

pub use cache::{CacheStats, MediaCache, MediaLookup, ResolvedMedia, UnavailableReason};
pub use eviction::{EvictionPolicy, EvictionReport};
