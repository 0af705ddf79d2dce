// Downloads the full Kite instrument list (CSV) and keeps the last good copy.
//
// Failures are logged and swallowed: readers keep whatever was cached before,
// and the next timer tick is the only retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use reqwest::{Client, StatusCode};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};

use crate::error::{RelayError, RelayResult};
use crate::relay::RelayState;

pub const KITE_VERSION_HEADER: &str = "X-Kite-Version";
pub const KITE_VERSION: &str = "3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Updated { bytes: usize, records: usize },
    Failed,
    /// Another fetch was already running.
    Skipped,
}

impl FetchOutcome {
    fn label(self) -> &'static str {
        match self {
            FetchOutcome::Updated { .. } => "updated",
            FetchOutcome::Failed => "failed",
            FetchOutcome::Skipped => "skipped",
        }
    }
}

// Clears the in-flight flag however the fetch ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Data rows in the CSV, header excluded. Only used for logging.
pub fn count_records(csv_body: &[u8]) -> usize {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_body)
        .byte_records()
        .filter(Result::is_ok)
        .count()
}

pub struct CatalogFetcher {
    client: Client,
    url: String,
    state: Arc<RelayState>,
    in_flight: AtomicBool,
}

impl CatalogFetcher {
    pub fn new(url: impl Into<String>, state: Arc<RelayState>) -> RelayResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client, url, state))
    }

    pub fn with_client(client: Client, url: impl Into<String>, state: Arc<RelayState>) -> Self {
        Self { client, url: url.into(), state, in_flight: AtomicBool::new(false) }
    }

    async fn download(&self) -> RelayResult<Bytes> {
        let response = self
            .client
            .get(&self.url)
            .header(KITE_VERSION_HEADER, KITE_VERSION)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(RelayError::UpstreamStatus(status.as_u16()));
        }
        let body = response.bytes().await?;
        // An empty list is treated like no list at all
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(RelayError::EmptyBody);
        }
        Ok(body)
    }

    /// One download attempt. Replaces the cached catalog only on a non-empty HTTP 200.
    pub async fn fetch(&self) -> FetchOutcome {
        let outcome = match InFlight::acquire(&self.in_flight) {
            None => {
                debug!(url = %self.url, "instrument download already in flight, skipping");
                FetchOutcome::Skipped
            }
            Some(_guard) => {
                info!(url = %self.url, "downloading instruments");
                match self.download().await {
                    Ok(body) => {
                        let bytes = body.len();
                        let records = count_records(&body);
                        self.state.catalog.replace(body, records);
                        metrics::gauge!("relay_catalog_bytes").set(bytes as f64);
                        metrics::gauge!("relay_catalog_records").set(records as f64);
                        info!(bytes, records, "instruments CSV downloaded");
                        FetchOutcome::Updated { bytes, records }
                    }
                    Err(e) => {
                        error!(url = %self.url, error = %e, "instrument download failed, keeping previous catalog");
                        FetchOutcome::Failed
                    }
                }
            }
        };
        metrics::counter!("relay_catalog_fetch_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    /// Fetch now, then once per `every`, for as long as the task lives.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn run_periodic(self: Arc<Self>, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let outcome = self.fetch().await;
            debug!(?outcome, next_in_secs = every.as_secs(), "catalog refresh done");
        }
    }
}
