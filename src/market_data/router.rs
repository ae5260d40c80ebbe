use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::market_data::normalize::{self, BasisUpdate};
use crate::market_data::types::{Envelope, FlowEvent, FlowKind, OptionRow, Topic};
use crate::metrics::prometheus;
use crate::state::{SharedStore, StateStore};

/// Decode one frame and apply it to the store.
///
/// Returns the topic that was applied, or `None` for topics this build does
/// not know about.
pub fn dispatch_frame(store: &mut StateStore, frame: &str) -> Result<Option<Topic>, FeedError> {
    let envelope: Envelope = serde_json::from_str(frame)?;
    let Some(topic) = Topic::parse(&envelope.topic) else {
        debug!(topic = %envelope.topic, "ignoring unknown topic");
        return Ok(None);
    };
    apply(store, topic, &envelope.data)?;
    Ok(Some(topic))
}

fn apply(store: &mut StateStore, topic: Topic, data: &serde_json::Value) -> Result<(), FeedError> {
    match topic {
        Topic::EquityTs => {
            let update = normalize::equity_update(data)?;
            store.merge_equities(update.ticks);
            if let BasisUpdate::Set(basis) = update.basis {
                store.set_basis(basis);
            }
        }
        Topic::Basis => store.set_basis(normalize::basis_value(data)),
        Topic::OptionsTs => {
            let rows: Vec<OptionRow> = normalize::row_list("options_ts", data)?;
            store.replace_options(rows);
        }
        Topic::Sweeps => append_flow(store, FlowKind::Sweep, data)?,
        Topic::Blocks => append_flow(store, FlowKind::Block, data)?,
        Topic::Watchlist => store.replace_watchlist(normalize::watchlist(data)?),
    }
    Ok(())
}

fn append_flow(store: &mut StateStore, kind: FlowKind, data: &serde_json::Value) -> Result<(), FeedError> {
    let topic = match kind {
        FlowKind::Sweep => "sweeps",
        FlowKind::Block => "blocks",
    };
    let mut batch: Vec<FlowEvent> = normalize::flow_batch(topic, data)?;
    for event in &mut batch {
        event.ul = normalize::canonical_symbol(&event.ul);
    }
    prometheus::record_flow_events(kind.as_str(), batch.len());
    store.append_flow(kind, batch);
    Ok(())
}

/// Consumes raw frames in arrival order and reconciles them into the store.
///
/// Every applied frame bumps `changes`, which is what view consumers wait
/// on. Decode faults are recorded on the store and the frame is dropped.
pub async fn run_router(
    mut rx: mpsc::Receiver<String>,
    store: SharedStore,
    changes: watch::Sender<u64>,
) -> anyhow::Result<()> {
    info!("router started");

    while let Some(frame) = rx.recv().await {
        let outcome = {
            let mut guard = store.write().await;
            let outcome = dispatch_frame(&mut guard, &frame);
            match &outcome {
                Ok(Some(_)) => guard.clear_error(),
                Ok(None) => {}
                Err(err) => guard.record_error(err),
            }
            outcome
        };

        match outcome {
            Ok(Some(topic)) => {
                debug!(topic = topic.as_str(), bytes = frame.len(), "frame applied");
                prometheus::record_frame(topic.as_str());
                changes.send_modify(|rev| *rev += 1);
            }
            Ok(None) => prometheus::record_frame("unknown"),
            Err(err) => {
                warn!(error = %err, "dropping frame");
                prometheus::record_decode_error();
                changes.send_modify(|rev| *rev += 1);
            }
        }
    }

    info!("frame channel closed, router shutting down");
    Ok(())
}
