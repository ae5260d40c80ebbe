use thiserror::Error;

/// Errors surfaced by the ingestion core and the watchlist client.
///
/// None of these are fatal: callers log them and keep the last one around
/// as a display value.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unexpected `{topic}` payload: {reason}")]
    Payload { topic: &'static str, reason: String },

    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("watchlist request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("watchlist request returned {status}")]
    Status { status: reqwest::StatusCode },
}

impl FeedError {
    pub(crate) fn payload(topic: &'static str, reason: impl Into<String>) -> Self {
        FeedError::Payload {
            topic,
            reason: reason.into(),
        }
    }
}
