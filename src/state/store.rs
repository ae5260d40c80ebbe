use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::market_data::normalize::canonical_symbol;
use crate::market_data::types::{EquityTick, FlowEvent, FlowKind, OptionRow, Watchlist};
use crate::state::flow_buffer::FlowBuffer;

/// Per-section change counters. Views compare these to skip recomputation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Revisions {
    pub equities: u64,
    pub options: u64,
    pub sweeps: u64,
    pub blocks: u64,
    pub watchlist: u64,
    pub basis: u64,
}

/// Authoritative in-memory snapshot of everything received on the stream.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    equities: HashMap<String, EquityTick>,
    options: Vec<OptionRow>,
    sweeps: FlowBuffer,
    blocks: FlowBuffer,
    watchlist: Watchlist,
    basis: Option<f64>,
    last_error: Option<String>,
    revisions: Revisions,
}

pub type SharedStore = Arc<RwLock<StateStore>>;

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    /// Latest tick wins, whole-record replacement. Ticks whose symbol
    /// canonicalises to nothing (e.g. a bare `/`) are dropped.
    pub fn merge_equities(&mut self, ticks: Vec<EquityTick>) {
        let mut merged = false;
        for mut tick in ticks {
            let key = canonical_symbol(&tick.symbol);
            if key.is_empty() {
                continue;
            }
            tick.symbol = key.clone();
            self.equities.insert(key, tick);
            merged = true;
        }
        if merged {
            self.revisions.equities += 1;
        }
    }

    pub fn set_basis(&mut self, basis: Option<f64>) {
        self.basis = basis.filter(|b| b.is_finite());
        self.revisions.basis += 1;
    }

    /// Full-snapshot semantics: the previous chain is discarded.
    pub fn replace_options(&mut self, rows: Vec<OptionRow>) {
        self.options = rows;
        self.revisions.options += 1;
    }

    pub fn append_flow(&mut self, kind: FlowKind, batch: Vec<FlowEvent>) {
        if batch.is_empty() {
            return;
        }
        match kind {
            FlowKind::Sweep => {
                self.sweeps.append(batch);
                self.revisions.sweeps += 1;
            }
            FlowKind::Block => {
                self.blocks.append(batch);
                self.revisions.blocks += 1;
            }
        }
    }

    pub fn replace_watchlist(&mut self, watchlist: Watchlist) {
        self.watchlist = watchlist;
        self.revisions.watchlist += 1;
    }

    pub fn record_error(&mut self, error: impl ToString) {
        self.last_error = Some(error.to_string());
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn equity(&self, symbol: &str) -> Option<&EquityTick> {
        self.equities.get(&canonical_symbol(symbol))
    }

    pub fn equities(&self) -> impl Iterator<Item = &EquityTick> {
        self.equities.values()
    }

    pub fn equity_count(&self) -> usize {
        self.equities.len()
    }

    pub fn options(&self) -> &[OptionRow] {
        &self.options
    }

    pub fn flow(&self, kind: FlowKind) -> &FlowBuffer {
        match kind {
            FlowKind::Sweep => &self.sweeps,
            FlowKind::Block => &self.blocks,
        }
    }

    pub fn watchlist(&self) -> &Watchlist {
        &self.watchlist
    }

    pub fn basis(&self) -> Option<f64> {
        self.basis
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn revisions(&self) -> Revisions {
        self.revisions
    }
}
