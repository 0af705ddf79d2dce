//! Process-wide state shared by the ticker router, the catalog fetcher and the HTTP gateway.
use std::sync::atomic::{AtomicBool, Ordering};

use crate::catalog::InstrumentCatalog;
use crate::market_data::price_cache::LatestPriceCache;

/// Constructed once in `main` and handed out as `Arc<RelayState>`.
#[derive(Debug, Default)]
pub struct RelayState {
    pub prices: LatestPriceCache,
    pub catalog: InstrumentCatalog,
    ticker_connected: AtomicBool,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticker_connected(&self) -> bool {
        self.ticker_connected.load(Ordering::Relaxed)
    }

    pub fn set_ticker_connected(&self, connected: bool) {
        self.ticker_connected.store(connected, Ordering::Relaxed);
        metrics::gauge!("relay_ticker_connected").set(if connected { 1.0 } else { 0.0 });
    }
}
