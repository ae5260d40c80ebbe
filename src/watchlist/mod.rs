pub mod client;

use async_trait::async_trait;

use crate::error::FeedError;

pub use client::HttpWatchlistClient;

/// Mutations of the server-side watchlist.
///
/// Fire-and-forget: success only means the server accepted the request.
/// The resulting list arrives later on the `watchlist` stream topic.
#[async_trait]
pub trait WatchlistApi: Send + Sync {
    async fn add(&self, symbol: &str) -> Result<(), FeedError>;
    async fn remove(&self, symbol: &str) -> Result<(), FeedError>;
}
