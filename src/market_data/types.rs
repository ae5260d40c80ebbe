use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Topics carried on the stream. Anything else is ignored by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    EquityTs,
    Basis,
    OptionsTs,
    Sweeps,
    Blocks,
    Watchlist,
}

impl Topic {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "equity_ts" => Some(Topic::EquityTs),
            "basis" => Some(Topic::Basis),
            "options_ts" => Some(Topic::OptionsTs),
            "sweeps" => Some(Topic::Sweeps),
            "blocks" => Some(Topic::Blocks),
            "watchlist" => Some(Topic::Watchlist),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::EquityTs => "equity_ts",
            Topic::Basis => "basis",
            Topic::OptionsTs => "options_ts",
            Topic::Sweeps => "sweeps",
            Topic::Blocks => "blocks",
            Topic::Watchlist => "watchlist",
        }
    }
}

/// One inbound frame: `{topic, data}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub topic: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Right {
    Call,
    Put,
}

impl Right {
    /// Accepts `C`, `CALL`, `P`, `PUT` in any case.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "C" | "CALL" => Some(Right::Call),
            "P" | "PUT" => Some(Right::Put),
            _ => None,
        }
    }

    pub fn letter(self) -> &'static str {
        match self {
            Right::Call => "C",
            Right::Put => "P",
        }
    }
}

impl<'de> Deserialize<'de> for Right {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Right::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown option right {raw:?}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlowSide {
    Buy,
    Sell,
    #[default]
    Unknown,
}

impl FlowSide {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" | "B" => FlowSide::Buy,
            "SELL" | "S" => FlowSide::Sell,
            _ => FlowSide::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for FlowSide {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(match raw {
            Some(Value::String(s)) => FlowSide::parse(&s),
            _ => FlowSide::Unknown,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    Sweep,
    Block,
}

impl FlowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowKind::Sweep => "sweep",
            FlowKind::Block => "block",
        }
    }
}

/// Latest quote for one equity or future. Keyed by canonical symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityTick {
    #[serde(deserialize_with = "loose::string")]
    pub symbol: String,
    #[serde(default, deserialize_with = "loose::number")]
    pub last: Option<f64>,
    #[serde(default, deserialize_with = "loose::number")]
    pub bid: Option<f64>,
    #[serde(default, deserialize_with = "loose::number")]
    pub ask: Option<f64>,
    #[serde(default, deserialize_with = "loose::number")]
    pub iv: Option<f64>,
    #[serde(default, deserialize_with = "loose::timestamp")]
    pub ts: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionRow {
    #[serde(deserialize_with = "loose::string")]
    pub underlying: String,
    #[serde(deserialize_with = "loose::string")]
    pub expiration: String,
    #[serde(deserialize_with = "loose::required_number")]
    pub strike: f64,
    pub right: Right,
    #[serde(default, deserialize_with = "loose::number")]
    pub last: Option<f64>,
    #[serde(default, deserialize_with = "loose::number")]
    pub bid: Option<f64>,
    #[serde(default, deserialize_with = "loose::number")]
    pub ask: Option<f64>,
    #[serde(default, deserialize_with = "loose::timestamp")]
    pub ts: Option<i64>,
}

/// A sweep or block print. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEvent {
    #[serde(alias = "underlying", deserialize_with = "loose::string")]
    pub ul: String,
    pub right: Right,
    #[serde(deserialize_with = "loose::required_number")]
    pub strike: f64,
    #[serde(alias = "expiration", deserialize_with = "loose::string")]
    pub expiry: String,
    #[serde(default)]
    pub side: FlowSide,
    #[serde(default, deserialize_with = "loose::number_or_zero")]
    pub qty: f64,
    #[serde(default, deserialize_with = "loose::number_or_zero")]
    pub price: f64,
    #[serde(default, deserialize_with = "loose::number")]
    pub notional: Option<f64>,
    #[serde(default, deserialize_with = "loose::count")]
    pub prints: Option<u32>,
    #[serde(default, deserialize_with = "loose::optional_string")]
    pub venue: Option<String>,
    #[serde(default = "loose::now_ms", deserialize_with = "loose::timestamp_or_now")]
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchOption {
    #[serde(deserialize_with = "loose::string")]
    pub underlying: String,
    #[serde(deserialize_with = "loose::string")]
    pub expiration: String,
    #[serde(deserialize_with = "loose::required_number")]
    pub strike: f64,
    pub right: Right,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Watchlist {
    pub equities: Vec<String>,
    pub options: Vec<WatchOption>,
}

impl Watchlist {
    pub fn contains_equity(&self, symbol: &str) -> bool {
        let key = crate::market_data::normalize::canonical_symbol(symbol);
        self.equities.iter().any(|s| *s == key)
    }
}

/// Field-level coercion for upstream payloads that mix numbers and strings.
mod loose {
    use crate::market_data::normalize::{coerce_f64, timestamp_ms};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        let raw = Option::<Value>::deserialize(d)?;
        Ok(raw.as_ref().and_then(coerce_f64))
    }

    pub fn number_or_zero<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(number(d)?.unwrap_or(0.0))
    }

    pub fn required_number<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        number(d)?.ok_or_else(|| D::Error::custom("expected a finite number"))
    }

    pub fn count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
        Ok(number(d)?
            .filter(|n| *n >= 0.0 && *n <= u32::MAX as f64)
            .map(|n| n as u32))
    }

    pub fn optional_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let raw = Option::<Value>::deserialize(d)?;
        Ok(match raw {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        optional_string(d)?.ok_or_else(|| D::Error::custom("expected a non-empty string"))
    }

    pub fn timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let raw = Option::<Value>::deserialize(d)?;
        Ok(raw.as_ref().and_then(timestamp_ms))
    }

    pub fn timestamp_or_now<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        Ok(timestamp(d)?.unwrap_or_else(now_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equity_tick_accepts_numeric_strings() {
        let tick: EquityTick = serde_json::from_value(json!({
            "symbol": "nvda",
            "last": "131.5",
            "bid": 131.4,
            "ask": null,
            "iv": "n/a",
            "ts": 1_700_000_000,
        }))
        .unwrap();

        assert_eq!(tick.symbol, "nvda");
        assert_eq!(tick.last, Some(131.5));
        assert_eq!(tick.bid, Some(131.4));
        assert_eq!(tick.ask, None);
        assert_eq!(tick.iv, None);
        assert_eq!(tick.ts, Some(1_700_000_000_000));
    }

    #[test]
    fn equity_tick_requires_symbol() {
        assert!(serde_json::from_value::<EquityTick>(json!({"last": 1.0})).is_err());
        assert!(serde_json::from_value::<EquityTick>(json!({"symbol": "  "})).is_err());
    }

    #[test]
    fn option_row_parses_loose_right() {
        let row: OptionRow = serde_json::from_value(json!({
            "underlying": "AAPL",
            "expiration": "2025-01-17",
            "strike": "150",
            "right": "call",
        }))
        .unwrap();
        assert_eq!(row.right, Right::Call);
        assert_eq!(row.strike, 150.0);

        let bad = serde_json::from_value::<OptionRow>(json!({
            "underlying": "AAPL",
            "expiration": "2025-01-17",
            "strike": 150,
            "right": "X",
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn flow_event_defaults() {
        let before = chrono::Utc::now().timestamp_millis();
        let event: FlowEvent = serde_json::from_value(json!({
            "underlying": "SPY",
            "right": "PUT",
            "strike": 500,
            "expiration": "2025-03-21",
            "side": "weird",
        }))
        .unwrap();

        assert_eq!(event.ul, "SPY");
        assert_eq!(event.side, FlowSide::Unknown);
        assert_eq!(event.qty, 0.0);
        assert_eq!(event.notional, None);
        assert!(event.ts >= before);
    }

    #[test]
    fn topic_tags() {
        assert_eq!(Topic::parse("options_ts"), Some(Topic::OptionsTs));
        assert_eq!(Topic::parse("heartbeat"), None);
        assert_eq!(Topic::Sweeps.as_str(), "sweeps");
    }
}
