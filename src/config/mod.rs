use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use crate::market_data::connection::Backoff;
use crate::market_data::normalize::normalize_tickers;
use crate::views::FlowFilter;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub stream_url: String,
    pub api_base_url: String,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub min_notional: f64,
    pub min_qty: f64,
    pub metrics_port: Option<u16>,
    pub watchlist_seed: Vec<String>,
    pub summary_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // dotenvy loads .env, but doesn't override already-set env vars
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, so tests don't have to touch the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let reconnect_base = Duration::from_millis(parse(&lookup, "RECONNECT_BASE_MS", 1_000)?);
        let reconnect_max = Duration::from_millis(parse(&lookup, "RECONNECT_MAX_MS", 10_000)?);
        if reconnect_max < reconnect_base {
            bail!("RECONNECT_MAX_MS must be >= RECONNECT_BASE_MS");
        }

        let metrics_port = match lookup("METRICS_PORT") {
            Some(raw) => Some(raw.trim().parse::<u16>().with_context(|| format!("invalid METRICS_PORT {raw:?}"))?),
            None => None,
        };

        let watchlist_seed = lookup("WATCHLIST_SEED")
            .map(|raw| normalize_tickers(&serde_json::Value::String(raw)))
            .unwrap_or_default();

        let defaults = FlowFilter::default();

        Ok(Self {
            log_level: get("RUST_LOG", "info"),
            stream_url: get("STREAM_URL", "ws://127.0.0.1:8000/ws"),
            api_base_url: get("API_BASE_URL", "http://127.0.0.1:8000"),
            reconnect_base,
            reconnect_max,
            min_notional: parse(&lookup, "FLOW_MIN_NOTIONAL", defaults.min_notional)?,
            min_qty: parse(&lookup, "FLOW_MIN_QTY", defaults.min_qty)?,
            metrics_port,
            watchlist_seed,
            summary_interval: Duration::from_secs(parse(&lookup, "SUMMARY_INTERVAL_SECS", 10)?),
        })
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.reconnect_base, self.reconnect_max)
    }

    pub fn flow_filter(&self) -> FlowFilter {
        FlowFilter::new(self.min_notional, self.min_qty)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid {key} {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.backoff(), Backoff::default());
        assert_eq!(cfg.flow_filter(), FlowFilter::default());
        assert_eq!(cfg.metrics_port, None);
        assert!(cfg.watchlist_seed.is_empty());
        assert_eq!(cfg.summary_interval, Duration::from_secs(10));
    }

    #[test]
    fn overrides() {
        let cfg = config(&[
            ("STREAM_URL", "wss://feed.example/ws"),
            ("RECONNECT_BASE_MS", "250"),
            ("RECONNECT_MAX_MS", "4000"),
            ("FLOW_MIN_NOTIONAL", "20000"),
            ("FLOW_MIN_QTY", "50"),
            ("METRICS_PORT", "9000"),
            ("WATCHLIST_SEED", "nvda, /es;-bad"),
        ])
        .unwrap();

        assert_eq!(cfg.stream_url, "wss://feed.example/ws");
        assert_eq!(cfg.backoff().delay(5), Duration::from_millis(4000));
        assert_eq!(cfg.flow_filter(), FlowFilter::TYPICAL);
        assert_eq!(cfg.metrics_port, Some(9000));
        assert_eq!(cfg.watchlist_seed, vec!["NVDA", "ES"]);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config(&[("RECONNECT_BASE_MS", "soon")]).is_err());
        assert!(config(&[("RECONNECT_BASE_MS", "5000"), ("RECONNECT_MAX_MS", "1000")]).is_err());
        assert!(config(&[("METRICS_PORT", "70000")]).is_err());
    }
}
