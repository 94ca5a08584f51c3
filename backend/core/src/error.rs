use thiserror::Error;

/// Top-level error type for the Tally runtime.
#[derive(Debug, Error)]
pub enum TallyError {
    #[error("cache tier error: {0}")]
    Tier(String),

    #[error("durable store error: {0}")]
    Store(String),

    #[error("malformed cached document for guild {guild_id}: {reason}")]
    MalformedDocument { guild_id: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
