// Shared trait + event for streaming ticker adapters
use std::time::Duration;

use self::kite_types::Tick;

#[derive(Debug, Clone, PartialEq)]
pub enum TickerEvent {
    /// Socket is up and the subscription has been requested.
    Connected,
    // One decoded binary frame, in delivery order
    Ticks(Vec<Tick>),
    Error(String),
    Closed {
        code: Option<u16>,
        reason: String,
    },
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    /// Reconnect attempts exhausted; the adapter has stopped.
    NoReconnect,
}

#[async_trait::async_trait]
pub trait TickerAdapter {
    // Push events into the router through the given sender. Returns once the
    // adapter gives up or the receiving side is gone.
    async fn spawn(&self, tx: tokio::sync::mpsc::Sender<TickerEvent>);
}

pub mod kite;
pub mod kite_types;
