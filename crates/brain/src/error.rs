use thiserror::Error;

/// Failure kinds surfaced by the brain layer.
///
/// Only `StateUnavailable` is fatal to a query; everything else is recovered
/// locally by the caller (degrade, regenerate, or skip).
#[derive(Debug, Error)]
pub enum BrainError {
    /// Snapshot missing or unparseable. The query cannot proceed.
    #[error("brain state unavailable: {0}")]
    StateUnavailable(String),

    /// An on-disk cache (embeddings, partitions, sessions) is unreadable.
    /// Treated as empty and regenerated.
    #[error("cache corrupt at {path}: {reason}")]
    CacheCorrupt { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
