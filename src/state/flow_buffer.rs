use std::collections::VecDeque;

use crate::market_data::types::FlowEvent;

/// How many prior prints survive each append.
pub const FLOW_RETENTION: usize = 400;

/// Append-only print buffer with prune-then-append retention.
///
/// Before a batch lands the existing contents are cut to the newest
/// `retention` entries; the whole batch is then appended. A buffer therefore
/// never holds more than `retention + last_batch_len` events.
#[derive(Debug, Clone)]
pub struct FlowBuffer {
    events: VecDeque<FlowEvent>,
    retention: usize,
}

impl Default for FlowBuffer {
    fn default() -> Self {
        Self::with_retention(FLOW_RETENTION)
    }
}

impl FlowBuffer {
    pub fn with_retention(retention: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(retention),
            retention,
        }
    }

    pub fn append(&mut self, batch: Vec<FlowEvent>) {
        if self.events.len() > self.retention {
            let excess = self.events.len() - self.retention;
            self.events.drain(..excess);
        }
        self.events.extend(batch);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &FlowEvent> {
        self.events.iter()
    }
}
