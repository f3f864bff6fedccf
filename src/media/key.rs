//! Cache key normalization.

/// Lowercase, trim and strip everything that is not alphanumeric.
pub fn normalize(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Durable cache key for an `(artist, track)` pair.
pub fn track_key(artist: &str, track: &str) -> String {
    format!("{}:{}", normalize(artist), normalize(track))
}
