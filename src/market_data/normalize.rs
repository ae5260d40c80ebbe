//! Pure coercion helpers applied at the ingestion boundary.
//!
//! Every payload shape the upstream is known to send is resolved here, once,
//! into the canonical types in [`super::types`]. Nothing downstream probes
//! JSON shapes.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::error::FeedError;
use crate::market_data::types::{EquityTick, WatchOption, Watchlist};

/// Rendered in place of any missing or invalid value.
pub const MISSING: &str = "—";

/// Fractional IV at or below this is treated as a 0–1 ratio.
const IV_RATIO_THRESHOLD: f64 = 1.5;
const IV_CAP_PCT: f64 = 300.0;

const MAX_TICKER_LEN: usize = 10;

/// Epoch values below this are seconds, not milliseconds.
const SECONDS_EPOCH_CUTOFF: f64 = 1e12;

/// Uppercase and drop a single leading `/`, so `/es` and `ES` share a key.
pub fn canonical_symbol(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    match upper.strip_prefix('/') {
        Some(rest) => rest.to_string(),
        None => upper,
    }
}

/// 1–10 chars, alphanumeric first, then alphanumerics or `. - _ /`.
pub fn is_valid_ticker(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    candidate.chars().count() <= MAX_TICKER_LEN
        && first.is_ascii_alphanumeric()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/'))
}

/// Canonicalise one watchlist candidate, or reject it.
pub fn normalize_ticker(raw: &str) -> Option<String> {
    let symbol = canonical_symbol(raw);
    is_valid_ticker(&symbol).then_some(symbol)
}

fn split_tickers(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '|'))
        .filter(|part| !part.is_empty())
}

/// Accepts a single string, a delimiter-separated string or a sequence.
/// Invalid entries are dropped; the result is de-duplicated by first
/// occurrence.
pub fn normalize_tickers(input: &Value) -> Vec<String> {
    let mut raw: Vec<String> = Vec::new();
    match input {
        Value::String(s) => raw.extend(split_tickers(s).map(str::to_string)),
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(s) => raw.extend(split_tickers(s).map(str::to_string)),
                    Value::Number(n) => raw.push(n.to_string()),
                    _ => {}
                }
            }
        }
        _ => {}
    }

    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for candidate in raw {
        match normalize_ticker(&candidate) {
            Some(symbol) if !out.contains(&symbol) => out.push(symbol),
            Some(_) => {}
            None => trace!(candidate = %candidate, "dropping invalid ticker"),
        }
    }
    out
}

/// Number or numeric string; non-finite values are absent.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Epoch millis, epoch seconds or an RFC 3339 string, as epoch millis.
pub fn timestamp_ms(value: &Value) -> Option<i64> {
    if let Value::String(s) = value {
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s.trim()) {
            return Some(dt.timestamp_millis());
        }
    }
    let n = coerce_f64(value)?;
    if n <= 0.0 {
        return None;
    }
    let ms = if n < SECONDS_EPOCH_CUTOFF { n * 1000.0 } else { n };
    Some(ms as i64)
}

pub fn fmt_num(value: Option<f64>, decimals: usize) -> String {
    match value.filter(|v| v.is_finite()) {
        Some(v) => format!("{v:.decimals$}"),
        None => MISSING.to_string(),
    }
}

/// Like [`fmt_num`] but zero is also missing (bid/ask/IV).
pub fn fmt_num_nonzero(value: Option<f64>, decimals: usize) -> String {
    fmt_num(value.filter(|v| *v != 0.0), decimals)
}

/// IV as a whole percentage, capped at 300.
pub fn iv_percent(value: Option<f64>) -> Option<i64> {
    let v = value.filter(|v| v.is_finite() && *v > 0.0)?;
    let pct = if v <= IV_RATIO_THRESHOLD { v * 100.0 } else { v };
    Some(pct.min(IV_CAP_PCT).round() as i64)
}

pub fn fmt_iv(value: Option<f64>) -> String {
    match iv_percent(value) {
        Some(pct) => format!("{pct}%"),
        None => MISSING.to_string(),
    }
}

/// Coarse age of a timestamp relative to `now_ms`.
pub fn fmt_age(ts_ms: Option<i64>, now_ms: i64) -> String {
    let Some(ts) = ts_ms.filter(|ts| *ts > 0) else {
        return MISSING.to_string();
    };
    let secs = (now_ms - ts) as f64 / 1000.0;
    if secs < 1.5 {
        return "now".to_string();
    }
    let mins = secs / 60.0;
    let hours = mins / 60.0;
    if secs < 60.0 {
        format!("{}s", secs.floor())
    } else if mins < 60.0 {
        format!("{}m", mins.floor())
    } else if hours < 24.0 {
        format!("{}h", hours.floor())
    } else {
        format!("{}d", (hours / 24.0).floor())
    }
}

/// What an `equity_ts` frame does to the basis value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BasisUpdate {
    Unchanged,
    Set(Option<f64>),
}

/// An `equity_ts` payload resolved from either of its two shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct EquityUpdate {
    pub ticks: Vec<EquityTick>,
    pub basis: BasisUpdate,
}

fn basis_field(map: &serde_json::Map<String, Value>) -> Option<&Value> {
    map.get("es_spx_basis").or_else(|| map.get("basis"))
}

/// `equity_ts` is either a bare row sequence or `{rows, es_spx_basis}`.
///
/// Only the envelope carries a basis, so only the envelope overwrites it; a
/// missing or unusable basis key there means `None`.
pub fn equity_update(data: &Value) -> Result<EquityUpdate, FeedError> {
    match data {
        Value::Null => Ok(EquityUpdate {
            ticks: Vec::new(),
            basis: BasisUpdate::Unchanged,
        }),
        Value::Array(_) => Ok(EquityUpdate {
            ticks: rows(data),
            basis: BasisUpdate::Unchanged,
        }),
        Value::Object(map) => {
            let ticks = map.get("rows").map(rows).unwrap_or_default();
            let basis = BasisUpdate::Set(basis_field(map).and_then(coerce_f64));
            Ok(EquityUpdate { ticks, basis })
        }
        other => Err(FeedError::payload(
            "equity_ts",
            format!("expected rows or envelope, got {}", kind_of(other)),
        )),
    }
}

/// `basis` is `{es_spx_basis}`; a bare number is accepted too.
pub fn basis_value(data: &Value) -> Option<f64> {
    match data {
        Value::Object(map) => basis_field(map).and_then(coerce_f64),
        other => coerce_f64(other),
    }
}

/// Decode each element of a sequence independently, dropping rows that do
/// not fit. A lone object counts as a sequence of one.
pub fn rows<T: DeserializeOwned>(data: &Value) -> Vec<T> {
    let items: &[Value] = match data {
        Value::Array(items) => items,
        Value::Object(_) => std::slice::from_ref(data),
        _ => &[],
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<T>(item.clone()) {
            Ok(row) => Some(row),
            Err(err) => {
                trace!(error = %err, "dropping malformed row");
                None
            }
        })
        .collect()
}

/// Strict variant for snapshot topics whose payload must be a sequence.
pub fn row_list<T: DeserializeOwned>(topic: &'static str, data: &Value) -> Result<Vec<T>, FeedError> {
    match data {
        Value::Array(_) => Ok(rows(data)),
        other => Err(FeedError::payload(
            topic,
            format!("expected a sequence, got {}", kind_of(other)),
        )),
    }
}

/// Flow batches are sequences, but a lone event object is a batch of one.
/// That object must decode; otherwise the frame is rejected.
pub fn flow_batch<T: DeserializeOwned>(topic: &'static str, data: &Value) -> Result<Vec<T>, FeedError> {
    match data {
        Value::Object(_) => serde_json::from_value::<T>(data.clone())
            .map(|event| vec![event])
            .map_err(|err| FeedError::payload(topic, format!("malformed event: {err}"))),
        other => row_list(topic, other),
    }
}

/// `watchlist` is `{equities, options}`; a bare ticker list is accepted as
/// equities only.
pub fn watchlist(data: &Value) -> Result<Watchlist, FeedError> {
    match data {
        Value::Object(map) => {
            let equities = map.get("equities").map(normalize_tickers).unwrap_or_default();
            let options: Vec<WatchOption> = map
                .get("options")
                .filter(|v| v.is_array())
                .map(rows)
                .unwrap_or_default();
            let options = options
                .into_iter()
                .map(|mut opt| {
                    opt.underlying = canonical_symbol(&opt.underlying);
                    opt
                })
                .collect();
            Ok(Watchlist { equities, options })
        }
        Value::Array(_) | Value::String(_) => Ok(Watchlist {
            equities: normalize_tickers(data),
            options: Vec::new(),
        }),
        other => Err(FeedError::payload(
            "watchlist",
            format!("expected an object, got {}", kind_of(other)),
        )),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::types::{FlowEvent, OptionRow, Right};
    use serde_json::json;

    #[test]
    fn canonical_symbol_strips_one_slash() {
        assert_eq!(canonical_symbol("/es"), "ES");
        assert_eq!(canonical_symbol("ES"), "ES");
        assert_eq!(canonical_symbol("//NQ"), "/NQ");
    }

    #[test]
    fn ticker_validity() {
        assert_eq!(normalize_ticker("NVDA").as_deref(), Some("NVDA"));
        assert_eq!(normalize_ticker(" brk.b ").as_deref(), Some("BRK.B"));
        assert_eq!(normalize_ticker("1abc").as_deref(), Some("1ABC"));
        assert_eq!(normalize_ticker("/es").as_deref(), Some("ES"));
        assert_eq!(normalize_ticker("toolongsymbolname"), None);
        assert_eq!(normalize_ticker("-abc"), None);
        assert_eq!(normalize_ticker(""), None);
        assert!(is_valid_ticker("ABCDEFGHIJ"));
        assert!(!is_valid_ticker("ABCDEFGHIJK"));
    }

    #[test]
    fn tickers_split_and_dedupe() {
        assert_eq!(normalize_tickers(&json!("AB,CD")), vec!["AB", "CD"]);
        assert_eq!(
            normalize_tickers(&json!("spy qqq;iwm|spy, -bad")),
            vec!["SPY", "QQQ", "IWM"]
        );
        assert_eq!(
            normalize_tickers(&json!(["nvda", "AAPL msft", "NVDA", {"x": 1}])),
            vec!["NVDA", "AAPL", "MSFT"]
        );
        assert!(normalize_tickers(&json!(42.5)).is_empty());
    }

    #[test]
    fn numeric_display() {
        assert_eq!(fmt_num(Some(0.0), 2), "0.00");
        assert_eq!(fmt_num(Some(f64::NAN), 2), MISSING);
        assert_eq!(fmt_num(None, 2), MISSING);
        assert_eq!(fmt_num_nonzero(Some(0.0), 2), MISSING);
        assert_eq!(fmt_num_nonzero(Some(1.255), 1), "1.3");
    }

    #[test]
    fn iv_normalization() {
        assert_eq!(fmt_iv(Some(0.23)), "23%");
        assert_eq!(fmt_iv(Some(45.0)), "45%");
        assert_eq!(fmt_iv(Some(1.4)), "140%");
        assert_eq!(fmt_iv(Some(-1.0)), MISSING);
        assert_eq!(fmt_iv(Some(0.0)), MISSING);
        assert_eq!(fmt_iv(Some(950.0)), "300%");
        assert_eq!(fmt_iv(None), MISSING);
    }

    #[test]
    fn age_formatting() {
        let now = 1_700_000_000_000;
        assert_eq!(fmt_age(Some(now - 1_000), now), "now");
        assert_eq!(fmt_age(Some(now - 1_500), now), "1s");
        assert_eq!(fmt_age(Some(now - 59_900), now), "59s");
        assert_eq!(fmt_age(Some(now - 60_000), now), "1m");
        assert_eq!(fmt_age(Some(now - 3 * 3_600_000 - 5), now), "3h");
        assert_eq!(fmt_age(Some(now - 50 * 3_600_000), now), "2d");
        assert_eq!(fmt_age(None, now), MISSING);
    }

    #[test]
    fn timestamps() {
        assert_eq!(timestamp_ms(&json!(1_700_000_000)), Some(1_700_000_000_000));
        assert_eq!(timestamp_ms(&json!(1_700_000_000_123_i64)), Some(1_700_000_000_123));
        assert_eq!(
            timestamp_ms(&json!("2023-11-14T22:13:20Z")),
            Some(1_700_000_000_000)
        );
        assert_eq!(timestamp_ms(&json!("soon")), None);
    }

    #[test]
    fn equity_update_shapes() {
        let plain = equity_update(&json!([{"symbol": "SPY", "last": 1}])).unwrap();
        assert_eq!(plain.ticks.len(), 1);
        assert_eq!(plain.basis, BasisUpdate::Unchanged);

        let env = equity_update(&json!({"rows": [{"symbol": "/ES"}], "es_spx_basis": 1.25})).unwrap();
        assert_eq!(env.ticks.len(), 1);
        assert_eq!(env.basis, BasisUpdate::Set(Some(1.25)));

        let bad_basis = equity_update(&json!({"rows": [], "es_spx_basis": "nan"})).unwrap();
        assert_eq!(bad_basis.basis, BasisUpdate::Set(None));

        let no_rows = equity_update(&json!({})).unwrap();
        assert!(no_rows.ticks.is_empty());
        assert_eq!(no_rows.basis, BasisUpdate::Set(None));

        assert!(equity_update(&json!("junk")).is_err());
    }

    #[test]
    fn snapshot_rows_must_be_a_sequence() {
        let row = json!({"underlying": "AAPL", "expiration": "2025-01-17", "strike": 150, "right": "C"});
        let rows: Vec<OptionRow> = row_list("options_ts", &json!([row.clone(), {"strike": 1}])).unwrap();
        assert_eq!(rows.len(), 1);

        assert!(row_list::<OptionRow>("options_ts", &row).is_err());
        assert!(row_list::<OptionRow>("options_ts", &json!({"rows": [row]})).is_err());
    }

    #[test]
    fn lone_flow_event_must_decode() {
        let print = json!({"ul": "spy", "right": "P", "strike": 480, "expiry": "2025-03-21", "qty": 10, "price": 1.5});
        let batch: Vec<FlowEvent> = flow_batch("sweeps", &print).unwrap();
        assert_eq!(batch.len(), 1);

        assert!(matches!(
            flow_batch::<FlowEvent>("sweeps", &json!({"rows": [print]})),
            Err(FeedError::Payload { topic: "sweeps", .. })
        ));
        assert!(flow_batch::<FlowEvent>("blocks", &json!(3)).is_err());
    }

    #[test]
    fn watchlist_normalization() {
        let wl = watchlist(&json!({
            "equities": ["nvda", "/es", "nvda", "-bad"],
            "options": [
                {"underlying": "aapl", "expiration": "2025-01-17", "strike": 150, "right": "C"},
                {"underlying": "aapl", "strike": 150, "right": "C"}
            ]
        }))
        .unwrap();

        assert_eq!(wl.equities, vec!["NVDA", "ES"]);
        assert_eq!(wl.options.len(), 1);
        assert_eq!(wl.options[0].underlying, "AAPL");
        assert_eq!(wl.options[0].right, Right::Call);
        assert!(wl.contains_equity("/es"));

        assert!(watchlist(&json!(7)).is_err());
    }
}
