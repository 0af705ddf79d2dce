// Router drains adapter events into the shared state
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::market_data::adapters::{TickerAdapter, TickerEvent};
use crate::relay::RelayState;

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    pub batches: u64,
    pub applied: u64,
    pub ignored: u64,
}

/// Apply one event to the state. Connection problems are only logged.
pub fn handle_event(state: &RelayState, event: TickerEvent, stats: &mut RouterStats) {
    match event {
        TickerEvent::Connected => {
            info!("Kite ticker connected");
            state.set_ticker_connected(true);
        }
        TickerEvent::Ticks(ticks) => {
            stats.batches += 1;
            for tick in ticks {
                match state.prices.apply_tick(tick.instrument_token, tick.last_price) {
                    Some(index) => {
                        debug!(
                            %index,
                            ltp = tick.last_price,
                            mode = tick.mode.as_str(),
                            change_pct = ?tick.change,
                            ohlc = ?tick.ohlc,
                            exchange_ts = ?tick.exchange_timestamp,
                            "index tick"
                        );
                        stats.applied += 1;
                        metrics::counter!("relay_ticks_total").increment(1);
                    }
                    None => {
                        trace!(token = tick.instrument_token, tradable = tick.tradable, "tick for untracked token");
                        stats.ignored += 1;
                        metrics::counter!("relay_ticks_ignored_total").increment(1);
                    }
                }
            }
        }
        TickerEvent::Error(reason) => error!(%reason, "ticker error"),
        TickerEvent::Closed { code, reason } => {
            warn!(?code, %reason, "ticker closed");
            state.set_ticker_connected(false);
        }
        TickerEvent::Reconnecting { attempt, delay } => {
            info!(attempt, delay_secs = delay.as_secs_f64(), "ticker reconnecting");
            state.set_ticker_connected(false);
            metrics::counter!("relay_ticker_reconnects_total").increment(1);
        }
        TickerEvent::NoReconnect => {
            error!("ticker stopped reconnecting; prices will no longer update");
            state.set_ticker_connected(false);
        }
    }
}

/// Single consumer: events are applied in the order the adapter produced them.
#[instrument(skip_all)]
pub async fn run_router(state: Arc<RelayState>, mut rx: mpsc::Receiver<TickerEvent>) -> RouterStats {
    let mut stats = RouterStats::default();
    while let Some(event) = rx.recv().await {
        handle_event(&state, event, &mut stats);
    }
    debug!(?stats, "ticker event channel closed");
    stats
}

/// Spawn the adapter and the router it feeds.
pub fn spawn_ticker<A>(adapter: A, state: Arc<RelayState>) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<RouterStats>)
where
    A: TickerAdapter + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel::<TickerEvent>(EVENT_CHANNEL_CAPACITY);
    let adapter_task = tokio::spawn(async move {
        adapter.spawn(tx).await;
    });
    let router_task = tokio::spawn(run_router(state, rx));
    (adapter_task, router_task)
}
