use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::market_data::normalize::{fmt_age, fmt_iv, fmt_num, fmt_num_nonzero};
use crate::state::SharedStore;
use crate::views::{DerivedViews, FlowFilter, ViewCache};

/// One log line describing the current views.
pub fn summarize(views: &DerivedViews, now_ms: i64) -> String {
    let mut line = format!(
        "equities={} chains={} sweeps={} blocks={} watchlist={} basis={}",
        views.equities.len(),
        views.chains.len(),
        views.sweeps.len(),
        views.blocks.len(),
        views.watchlist.equities.len(),
        fmt_num(views.basis, 2),
    );

    if let Some(tick) = views.equities.first() {
        line.push_str(&format!(
            " | {} last={} bid={} ask={} iv={} age={}",
            tick.symbol,
            fmt_num(tick.last, 2),
            fmt_num_nonzero(tick.bid, 2),
            fmt_num_nonzero(tick.ask, 2),
            fmt_iv(tick.iv),
            fmt_age(tick.ts, now_ms),
        ));
    }

    if let Some(row) = views.sweeps.first() {
        let e = &row.event;
        line.push_str(&format!(
            " | sweep {} {}{} {} x{} @{} ${} {}",
            e.ul,
            fmt_num(Some(e.strike), 0),
            e.right.letter(),
            e.expiry,
            fmt_num(Some(e.qty), 0),
            fmt_num(Some(e.price), 2),
            fmt_num(Some(row.notional), 0),
            fmt_age(Some(e.ts), now_ms),
        ));
    }

    line
}

/// Recomputes the views whenever the store or the filter changes and logs
/// a summary, at most once per `min_interval`.
pub async fn run_view_publisher(
    store: SharedStore,
    mut changes: watch::Receiver<u64>,
    mut filter: watch::Receiver<FlowFilter>,
    min_interval: Duration,
) -> anyhow::Result<()> {
    let mut cache = ViewCache::new();
    let mut last_published: Option<Instant> = None;

    loop {
        tokio::select! {
            res = changes.changed() => if res.is_err() { break },
            res = filter.changed() => if res.is_err() { break },
        }

        if let Some(at) = last_published {
            let elapsed = at.elapsed();
            if elapsed < min_interval {
                sleep(min_interval - elapsed).await;
            }
        }

        let revision = *changes.borrow_and_update();
        let current_filter = *filter.borrow_and_update();
        let summary = {
            let guard = store.read().await;
            let views = cache.refresh(&guard, &current_filter);
            summarize(views, chrono::Utc::now().timestamp_millis())
        };

        if let Some(err) = cache.views().last_error.as_deref() {
            debug!(revision, error = err, "views carry last error");
        }
        info!(revision, "{summary}");
        last_published = Some(Instant::now());
    }

    info!("store notifications closed, view publisher shutting down");
    Ok(())
}
