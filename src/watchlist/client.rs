use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::WatchlistApi;
use crate::error::FeedError;
use crate::market_data::normalize::normalize_ticker;
use crate::metrics::prometheus;

pub struct HttpWatchlistClient {
    http: Client,
    base_url: String,
    last_error: RwLock<Option<String>>,
}

impl HttpWatchlistClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            last_error: RwLock::new(None),
        }
    }

    pub fn equities_url(&self) -> String {
        format!("{}/watchlist/equities", self.base_url)
    }

    /// Most recent request failure, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    async fn finish(&self, op: &'static str, symbol: &str, result: Result<(), FeedError>) -> Result<(), FeedError> {
        prometheus::record_watchlist_request(op, result.is_ok());
        match &result {
            Ok(()) => info!(op, symbol, "watchlist request accepted"),
            Err(err) => {
                warn!(op, symbol, error = %err, "watchlist request failed");
                *self.last_error.write().await = Some(err.to_string());
            }
        }
        result
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(), FeedError> {
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Status { status });
        }
        Ok(())
    }

    fn validate(symbol: &str) -> Result<String, FeedError> {
        normalize_ticker(symbol).ok_or_else(|| FeedError::InvalidSymbol(symbol.to_string()))
    }
}

#[async_trait]
impl WatchlistApi for HttpWatchlistClient {
    async fn add(&self, symbol: &str) -> Result<(), FeedError> {
        let result = match Self::validate(symbol) {
            Ok(symbol) => {
                self.send(self.http.post(self.equities_url()).json(&json!({ "symbol": symbol })))
                    .await
            }
            Err(err) => Err(err),
        };
        self.finish("add", symbol, result).await
    }

    async fn remove(&self, symbol: &str) -> Result<(), FeedError> {
        let result = match Self::validate(symbol) {
            Ok(symbol) => {
                let url = format!("{}/{}", self.equities_url(), symbol);
                self.send(self.http.delete(url)).await
            }
            Err(err) => Err(err),
        };
        self.finish("remove", symbol, result).await
    }
}
