use parking_lot::RwLock;
use serde::Serialize;
use tracing::trace;

use crate::market_data::index::IndexName;

/// Flat read of every tracked index. `None` serializes as JSON `null`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IndexLtpSnapshot {
    #[serde(rename = "NIFTY50")]
    pub nifty50: Option<f64>,
    #[serde(rename = "BANKNIFTY")]
    pub bank_nifty: Option<f64>,
    #[serde(rename = "SENSEX")]
    pub sensex: Option<f64>,
}

impl IndexLtpSnapshot {
    pub fn get(&self, index: IndexName) -> Option<f64> {
        match index {
            IndexName::Nifty50 => self.nifty50,
            IndexName::BankNifty => self.bank_nifty,
            IndexName::Sensex => self.sensex,
        }
    }

    fn slot_mut(&mut self, index: IndexName) -> &mut Option<f64> {
        match index {
            IndexName::Nifty50 => &mut self.nifty50,
            IndexName::BankNifty => &mut self.bank_nifty,
            IndexName::Sensex => &mut self.sensex,
        }
    }
}

/// Latest traded price per index. Every slot starts unknown, is overwritten
/// in place by ticks and is never cleared.
#[derive(Debug, Default)]
pub struct LatestPriceCache {
    inner: RwLock<IndexLtpSnapshot>,
}

impl LatestPriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tick. Returns the index it landed on, or `None` for a token we don't track.
    pub fn apply_tick(&self, instrument_token: u32, last_price: f64) -> Option<IndexName> {
        let index = IndexName::from_token(instrument_token)?;
        if !last_price.is_finite() {
            trace!(token = instrument_token, "dropping non-finite price");
            return None;
        }
        *self.inner.write().slot_mut(index) = Some(last_price);
        trace!(%index, last_price, "ltp updated");
        Some(index)
    }

    pub fn snapshot(&self) -> IndexLtpSnapshot {
        *self.inner.read()
    }

    pub fn get(&self, index: IndexName) -> Option<f64> {
        self.inner.read().get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_unknown() {
        let cache = LatestPriceCache::new();
        let snap = cache.snapshot();
        for index in IndexName::ALL {
            assert_eq!(snap.get(index), None);
        }
        assert_eq!(
            serde_json::to_value(snap).unwrap(),
            serde_json::json!({"NIFTY50": null, "BANKNIFTY": null, "SENSEX": null})
        );
    }

    #[test]
    fn test_tick_overwrites_only_its_index() {
        let cache = LatestPriceCache::new();
        cache.apply_tick(260105, 51000.0);

        assert_eq!(cache.apply_tick(256265, 24000.5), Some(IndexName::Nifty50));
        let snap = cache.snapshot();
        assert_eq!(snap.nifty50, Some(24000.5));
        assert_eq!(snap.bank_nifty, Some(51000.0));
        assert_eq!(snap.sensex, None);

        cache.apply_tick(256265, 24001.25);
        assert_eq!(cache.get(IndexName::Nifty50), Some(24001.25));
    }

    #[test]
    fn test_unknown_token_ignored() {
        let cache = LatestPriceCache::new();
        cache.apply_tick(265, 80000.0);
        let before = cache.snapshot();

        assert_eq!(cache.apply_tick(738561, 2900.0), None);
        assert_eq!(cache.snapshot(), before);
    }

    #[test]
    fn test_non_finite_price_ignored() {
        let cache = LatestPriceCache::new();
        cache.apply_tick(265, 80000.0);
        assert_eq!(cache.apply_tick(265, f64::NAN), None);
        assert_eq!(cache.get(IndexName::Sensex), Some(80000.0));
    }
}
