//! Display-ready views derived from the [`StateStore`].
//!
//! Everything here is a pure function of a store snapshot and the current
//! [`FlowFilter`]. [`ViewCache`] only skips sections whose inputs did not
//! change; it never holds state the store could not rebuild.

pub mod publisher;

use std::collections::HashMap;

use crate::market_data::types::{EquityTick, FlowEvent, FlowKind, OptionRow, Watchlist};
use crate::state::{FlowBuffer, Revisions, StateStore};

/// At most this many flow rows are shown per buffer, newest first.
pub const DISPLAY_LIMIT: usize = 200;

/// Per-contract multiplier used when a print has no explicit notional.
const CONTRACT_MULTIPLIER: f64 = 100.0;

/// Minimum size a print needs to be shown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowFilter {
    pub min_notional: f64,
    pub min_qty: f64,
}

impl Default for FlowFilter {
    /// Permissive: a fresh session shows everything.
    fn default() -> Self {
        Self {
            min_notional: 0.0,
            min_qty: 1.0,
        }
    }
}

impl FlowFilter {
    pub const TYPICAL: FlowFilter = FlowFilter {
        min_notional: 20_000.0,
        min_qty: 50.0,
    };

    pub fn new(min_notional: f64, min_qty: f64) -> Self {
        Self {
            min_notional,
            min_qty,
        }
    }

    pub fn reset_to_typical(&mut self) {
        *self = Self::TYPICAL;
    }

    pub fn passes(&self, event: &FlowEvent) -> bool {
        notional_of(event) >= self.min_notional && event.qty >= self.min_qty
    }
}

/// Explicit notional if the upstream sent one, else `qty * price * 100`.
pub fn notional_of(event: &FlowEvent) -> f64 {
    match event.notional {
        Some(n) if n.is_finite() => n,
        _ => (event.qty * event.price * CONTRACT_MULTIPLIER).round(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowRow {
    pub event: FlowEvent,
    pub notional: f64,
}

/// Rows sharing one (underlying, expiration), ascending by strike.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionChain {
    pub key: String,
    pub underlying: String,
    pub expiration: String,
    pub rows: Vec<OptionRow>,
}

pub fn chain_key(underlying: &str, expiration: &str) -> String {
    format!("{underlying}|{expiration}")
}

/// All equities, ascending by canonical symbol.
pub fn equity_list(store: &StateStore) -> Vec<EquityTick> {
    let mut list: Vec<EquityTick> = store.equities().cloned().collect();
    list.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    list
}

/// Groups appear in the order their key was first seen.
pub fn option_chains(rows: &[OptionRow]) -> Vec<OptionChain> {
    let mut chains: Vec<OptionChain> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let key = chain_key(&row.underlying, &row.expiration);
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            chains.push(OptionChain {
                key,
                underlying: row.underlying.clone(),
                expiration: row.expiration.clone(),
                rows: Vec::new(),
            });
            chains.len() - 1
        });
        chains[slot].rows.push(row.clone());
    }

    for chain in &mut chains {
        chain.rows.sort_by(|a, b| a.strike.total_cmp(&b.strike));
    }
    chains
}

/// Filtered prints, newest first, capped at [`DISPLAY_LIMIT`].
pub fn flow_view(buffer: &FlowBuffer, filter: &FlowFilter) -> Vec<FlowRow> {
    buffer
        .iter()
        .rev()
        .filter(|event| filter.passes(event))
        .take(DISPLAY_LIMIT)
        .map(|event| FlowRow {
            notional: notional_of(event),
            event: event.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedViews {
    pub equities: Vec<EquityTick>,
    pub chains: Vec<OptionChain>,
    pub sweeps: Vec<FlowRow>,
    pub blocks: Vec<FlowRow>,
    pub watchlist: Watchlist,
    pub basis: Option<f64>,
    pub last_error: Option<String>,
}

pub fn compute(store: &StateStore, filter: &FlowFilter) -> DerivedViews {
    DerivedViews {
        equities: equity_list(store),
        chains: option_chains(store.options()),
        sweeps: flow_view(store.flow(FlowKind::Sweep), filter),
        blocks: flow_view(store.flow(FlowKind::Block), filter),
        watchlist: store.watchlist().clone(),
        basis: store.basis(),
        last_error: store.last_error().map(str::to_string),
    }
}

/// Recomputes only the sections whose store revision or filter changed.
#[derive(Debug, Default)]
pub struct ViewCache {
    seen: Option<(Revisions, FlowFilter)>,
    views: DerivedViews,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh(&mut self, store: &StateStore, filter: &FlowFilter) -> &DerivedViews {
        let rev = store.revisions();
        let (prev, prev_filter) = match self.seen {
            Some((prev, prev_filter)) => (Some(prev), Some(prev_filter)),
            None => (None, None),
        };
        let filter_changed = prev_filter != Some(*filter);
        let stale = |section: fn(&Revisions) -> u64| prev.is_none_or(|p| section(&p) != section(&rev));

        if stale(|r| r.equities) {
            self.views.equities = equity_list(store);
        }
        if stale(|r| r.options) {
            self.views.chains = option_chains(store.options());
        }
        if filter_changed || stale(|r| r.sweeps) {
            self.views.sweeps = flow_view(store.flow(FlowKind::Sweep), filter);
        }
        if filter_changed || stale(|r| r.blocks) {
            self.views.blocks = flow_view(store.flow(FlowKind::Block), filter);
        }
        if stale(|r| r.watchlist) {
            self.views.watchlist = store.watchlist().clone();
        }
        self.views.basis = store.basis();
        self.views.last_error = store.last_error().map(str::to_string);

        self.seen = Some((rev, *filter));
        &self.views
    }

    pub fn views(&self) -> &DerivedViews {
        &self.views
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::types::{FlowSide, Right};

    fn event(qty: f64, price: f64, notional: Option<f64>, ts: i64) -> FlowEvent {
        FlowEvent {
            ul: "SPY".to_string(),
            right: Right::Put,
            strike: 480.0,
            expiry: "2025-03-21".to_string(),
            side: FlowSide::Sell,
            qty,
            price,
            notional,
            prints: Some(3),
            venue: None,
            ts,
        }
    }

    fn option(underlying: &str, expiration: &str, strike: f64) -> OptionRow {
        OptionRow {
            underlying: underlying.to_string(),
            expiration: expiration.to_string(),
            strike,
            right: Right::Call,
            last: None,
            bid: None,
            ask: None,
            ts: None,
        }
    }

    fn tick(symbol: &str) -> EquityTick {
        EquityTick {
            symbol: symbol.to_string(),
            last: Some(1.0),
            bid: None,
            ask: None,
            iv: None,
            ts: None,
        }
    }

    #[test]
    fn notional_uses_contract_multiplier() {
        assert_eq!(notional_of(&event(10.0, 5.0, None, 0)), 5000.0);
        assert_eq!(notional_of(&event(1.0, 1.0, Some(999.0), 0)), 999.0);
        assert_eq!(notional_of(&event(3.0, 0.333, None, 0)), 100.0);
    }

    #[test]
    fn filter_defaults_and_typical_preset() {
        let mut filter = FlowFilter::default();
        assert!(filter.passes(&event(1.0, 0.01, None, 0)));
        assert!(!filter.passes(&event(0.0, 5.0, None, 0)));

        filter.reset_to_typical();
        assert_eq!(filter, FlowFilter::new(20_000.0, 50.0));
        assert!(filter.passes(&event(50.0, 4.0, None, 0)));
        assert!(!filter.passes(&event(49.0, 100.0, None, 0)));
        assert!(!filter.passes(&event(100.0, 1.0, None, 0)));
    }

    #[test]
    fn option_grouping() {
        let rows = vec![
            option("AAPL", "2025-01-17", 150.0),
            option("AAPL", "2025-02-21", 155.0),
            option("AAPL", "2025-01-17", 140.0),
        ];
        let chains = option_chains(&rows);

        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].key, chain_key("AAPL", "2025-01-17"));
        let strikes: Vec<f64> = chains[0].rows.iter().map(|r| r.strike).collect();
        assert_eq!(strikes, vec![140.0, 150.0]);
        assert_eq!(chains[1].expiration, "2025-02-21");
    }

    #[test]
    fn group_order_follows_first_seen_not_sorted() {
        let rows = vec![option("TSLA", "2025-01-17", 1.0), option("AAPL", "2025-01-17", 1.0)];
        let keys: Vec<String> = option_chains(&rows).into_iter().map(|c| c.underlying).collect();
        assert_eq!(keys, vec!["TSLA", "AAPL"]);
    }

    #[test]
    fn equities_sorted_by_symbol() {
        let mut store = StateStore::new();
        store.merge_equities(vec![tick("QQQ"), tick("/ES"), tick("AAPL")]);
        let symbols: Vec<String> = equity_list(&store).into_iter().map(|t| t.symbol).collect();
        assert_eq!(symbols, vec!["AAPL", "ES", "QQQ"]);
    }

    #[test]
    fn flow_view_newest_first_and_capped() {
        let mut buffer = FlowBuffer::default();
        buffer.append((0..300).map(|ts| event(if ts % 2 == 0 { 100.0 } else { 0.0 }, 1.0, None, ts)).collect());
        buffer.append((300..600).map(|ts| event(100.0, 1.0, None, ts)).collect());

        let rows = flow_view(&buffer, &FlowFilter::default());
        assert_eq!(rows.len(), DISPLAY_LIMIT);
        assert_eq!(rows[0].event.ts, 599);
        assert_eq!(rows[DISPLAY_LIMIT - 1].event.ts, 400);
        assert_eq!(rows[0].notional, 10_000.0);

        let too_small = flow_view(&buffer, &FlowFilter::new(0.0, 101.0));
        assert!(too_small.is_empty());
    }

    #[test]
    fn views_are_reproducible_from_store() {
        let mut store = StateStore::new();
        store.merge_equities(vec![tick("B"), tick("A")]);
        store.replace_options(vec![option("X", "E", 2.0), option("X", "E", 1.0)]);
        store.append_flow(FlowKind::Sweep, vec![event(60.0, 5.0, None, 1)]);
        store.set_basis(Some(0.5));

        let filter = FlowFilter::default();
        assert_eq!(compute(&store, &filter), compute(&store.clone(), &filter));

        let mut cache = ViewCache::new();
        assert_eq!(*cache.refresh(&store, &filter), compute(&store, &filter));
    }

    #[test]
    fn cache_tracks_store_and_filter_changes() {
        let mut store = StateStore::new();
        let mut filter = FlowFilter::default();
        let mut cache = ViewCache::new();
        store.append_flow(FlowKind::Block, vec![event(60.0, 5.0, None, 1), event(10.0, 1.0, None, 2)]);
        assert_eq!(cache.refresh(&store, &filter).blocks.len(), 2);

        filter.reset_to_typical();
        assert_eq!(cache.refresh(&store, &filter).blocks.len(), 1);

        store.merge_equities(vec![tick("NVDA")]);
        store.replace_options(vec![option("NVDA", "2025-06-20", 100.0)]);
        let views = cache.refresh(&store, &filter);
        assert_eq!(views.equities.len(), 1);
        assert_eq!(views.chains.len(), 1);
        assert_eq!(*cache.views(), compute(&store, &filter));
    }
}
