// Kite ticker adapter: wss://ws.kite.trade?api_key=..&access_token=..
//
// Owns one streaming connection at a time. Subscribes the configured tokens in
// full mode on every (re)connect and turns frames into TickerEvents. A session
// that stays silent past the read timeout is dropped and reconnected.

use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, instrument, trace, warn};

use super::kite_types::{decode_frame, is_heartbeat, TextMessage, TickMode, TickerCommand};
use super::{TickerAdapter, TickerEvent};
use crate::config::{KiteCredentials, DEFAULT_TICKER_READ_TIMEOUT_SECS};
use crate::error::{RelayError, RelayResult};

/// Exponential reconnect backoff: 2^attempt seconds, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_attempts: 50, max_delay: Duration::from_secs(60) }
    }
}

impl ReconnectPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.max_delay)
    }
}

enum SessionEnd {
    // Socket went away; `established` says whether we got as far as connecting
    Disconnected { established: bool },
    ReceiverGone,
}

pub struct KiteTickerAdapter {
    url: String,
    endpoint: String, // url without credentials, for logs
    tokens: Vec<u32>,
    reconnect: ReconnectPolicy,
    read_timeout: Duration,
}

impl KiteTickerAdapter {
    pub fn new(ticker_url: &str, credentials: &KiteCredentials, tokens: Vec<u32>) -> RelayResult<Self> {
        let url = reqwest::Url::parse_with_params(
            ticker_url,
            &[
                ("api_key", credentials.api_key.as_str()),
                ("access_token", credentials.access_token.as_str()),
            ],
        )
        .map_err(|e| RelayError::InvalidConfig(format!("ticker url {ticker_url:?}: {e}")))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(RelayError::InvalidConfig(format!(
                "ticker url must use ws:// or wss://, got {ticker_url:?}"
            )));
        }

        Ok(Self {
            url: url.to_string(),
            endpoint: ticker_url.to_string(),
            tokens,
            reconnect: ReconnectPolicy::default(),
            read_timeout: Duration::from_secs(DEFAULT_TICKER_READ_TIMEOUT_SECS),
        })
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    /// Ask for the tokens and the detail level. Sent after every connect.
    async fn send_subscription<S>(&self, sink: &mut S) -> RelayResult<()>
    where
        S: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        if self.tokens.is_empty() {
            warn!("no instrument tokens configured, nothing to subscribe");
            return Ok(());
        }
        let subscribe = serde_json::to_string(&TickerCommand::subscribe(&self.tokens))?;
        sink.send(Message::Text(subscribe)).await?;
        let mode = serde_json::to_string(&TickerCommand::set_mode(TickMode::Full, &self.tokens))?;
        sink.send(Message::Text(mode)).await?;
        info!(tokens = ?self.tokens, mode = TickMode::Full.as_str(), "subscribed");
        Ok(())
    }

    async fn run_session(&self, tx: &Sender<TickerEvent>) -> SessionEnd {
        macro_rules! emit {
            ($event:expr) => {
                if tx.send($event).await.is_err() {
                    debug!("ticker event receiver dropped");
                    return SessionEnd::ReceiverGone;
                }
            };
        }

        let (ws_stream, response) = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok(ok) => ok,
            Err(e) => {
                error!(endpoint = %self.endpoint, error = %e, "failed to connect to Kite ticker");
                if let tungstenite::Error::Http(response) = &e {
                    error!(status = %response.status(), "ticker handshake rejected");
                }
                emit!(TickerEvent::Error(e.to_string()));
                return SessionEnd::Disconnected { established: false };
            }
        };
        info!(endpoint = %self.endpoint, status = %response.status(), "Kite ticker connected");

        let (mut write, mut read) = ws_stream.split();
        emit!(TickerEvent::Connected);

        if let Err(e) = self.send_subscription(&mut write).await {
            error!(error = %e, "failed to send subscription");
            emit!(TickerEvent::Error(e.to_string()));
            return SessionEnd::Disconnected { established: true };
        }

        loop {
            let msg = match tokio::time::timeout(self.read_timeout, read.next()).await {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(_) => {
                    let reason = format!("no data from ticker for {:?}", self.read_timeout);
                    warn!(%reason, "dropping silent ticker connection");
                    emit!(TickerEvent::Error(reason.clone()));
                    emit!(TickerEvent::Closed { code: None, reason });
                    return SessionEnd::Disconnected { established: true };
                }
            };
            match msg {
                Ok(Message::Binary(data)) => {
                    if is_heartbeat(&data) {
                        trace!("heartbeat");
                        continue;
                    }
                    let ticks = decode_frame(&data);
                    trace!(bytes = data.len(), ticks = ticks.len(), "binary frame");
                    if !ticks.is_empty() {
                        emit!(TickerEvent::Ticks(ticks));
                    }
                }
                Ok(Message::Text(text)) => match TextMessage::parse(&text) {
                    Ok(message) if message.is_error() => {
                        let detail = message.data_text();
                        warn!(error = %detail, "ticker reported an error");
                        emit!(TickerEvent::Error(detail));
                    }
                    Ok(message) => debug!(kind = %message.kind, "ticker text message"),
                    Err(e) => debug!(error = %e, "unparseable text frame"),
                },
                Ok(Message::Close(frame)) => {
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.into_owned()))
                        .unwrap_or((None, String::new()));
                    info!(?code, %reason, "ticker closed by server");
                    emit!(TickerEvent::Closed { code, reason });
                    return SessionEnd::Disconnected { established: true };
                }
                // tungstenite answers pings itself
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "ticker read failed");
                    emit!(TickerEvent::Error(e.to_string()));
                    emit!(TickerEvent::Closed { code: None, reason: e.to_string() });
                    return SessionEnd::Disconnected { established: true };
                }
            }
        }

        emit!(TickerEvent::Closed { code: None, reason: "stream ended".into() });
        SessionEnd::Disconnected { established: true }
    }
}

#[async_trait::async_trait]
impl TickerAdapter for KiteTickerAdapter {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn spawn(&self, tx: Sender<TickerEvent>) {
        let mut attempt: u32 = 0;
        loop {
            match self.run_session(&tx).await {
                SessionEnd::ReceiverGone => return,
                SessionEnd::Disconnected { established } => {
                    if established {
                        attempt = 0;
                    }
                }
            }

            attempt += 1;
            if attempt > self.reconnect.max_attempts {
                error!(attempts = self.reconnect.max_attempts, "giving up on Kite ticker");
                let _ = tx.send(TickerEvent::NoReconnect).await;
                return;
            }

            let delay = self.reconnect.delay(attempt);
            if tx.send(TickerEvent::Reconnecting { attempt, delay }).await.is_err() {
                return;
            }
            info!(attempt, delay_secs = delay.as_secs(), "reconnecting to Kite ticker");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::adapters::kite_types::tests::{frame, ltp_packet};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn creds() -> KiteCredentials {
        KiteCredentials { api_key: "key".into(), access_token: "tok en".into() }
    }

    #[test]
    fn test_url_carries_credentials() {
        let adapter = KiteTickerAdapter::new("wss://ws.kite.trade", &creds(), vec![265]).unwrap();
        assert_eq!(adapter.url, "wss://ws.kite.trade/?api_key=key&access_token=tok+en");
        assert!(!adapter.endpoint.contains("key"));
    }

    #[test]
    fn test_rejects_non_websocket_url() {
        assert!(KiteTickerAdapter::new("https://ws.kite.trade", &creds(), vec![265]).is_err());
        assert!(KiteTickerAdapter::new("not a url", &creds(), vec![265]).is_err());
    }

    #[test]
    fn test_backoff() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(5), Duration::from_secs(32));
        assert_eq!(policy.delay(6), Duration::from_secs(60));
        assert_eq!(policy.delay(200), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_session_subscribes_and_forwards_ticks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();

            let mut commands = Vec::new();
            while commands.len() < 2 {
                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    commands.push(text);
                }
            }

            ws.send(Message::Binary(vec![0])).await.unwrap(); // heartbeat
            ws.send(Message::Text(r#"{"type":"error","data":"boom"}"#.into())).await.unwrap();
            let f = frame(&[ltp_packet(256265, 2_400_050), ltp_packet(1, 10)]);
            ws.send(Message::Binary(f)).await.unwrap();
            ws.close(None).await.unwrap();
            commands
        });

        let adapter = KiteTickerAdapter::new(&format!("ws://{addr}"), &creds(), vec![256265, 260105, 265])
            .unwrap()
            .with_reconnect(ReconnectPolicy { max_attempts: 0, max_delay: Duration::from_millis(1) });

        let (tx, mut rx) = mpsc::channel(16);
        adapter.spawn(tx).await;

        let commands = server.await.unwrap();
        assert_eq!(commands[0], r#"{"a":"subscribe","v":[256265,260105,265]}"#);
        assert_eq!(commands[1], r#"{"a":"mode","v":["full",[256265,260105,265]]}"#);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events[0], TickerEvent::Connected);
        assert_eq!(events[1], TickerEvent::Error("boom".into()));
        match &events[2] {
            TickerEvent::Ticks(ticks) => {
                assert_eq!(ticks.len(), 2);
                assert_eq!(ticks[0].last_price, 24000.5);
            }
            other => panic!("expected ticks, got {:?}", other),
        }
        assert!(matches!(events[3], TickerEvent::Closed { .. }));
        assert_eq!(events.last(), Some(&TickerEvent::NoReconnect));
    }

    #[tokio::test]
    async fn test_silent_connection_is_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let mut seen = 0;
            while seen < 2 {
                if let Some(Ok(Message::Text(_))) = ws.next().await {
                    seen += 1;
                }
            }
            // keep the socket open but never send anything
            let _ = done_rx.await;
        });

        let adapter = KiteTickerAdapter::new(&format!("ws://{addr}"), &creds(), vec![265])
            .unwrap()
            .with_read_timeout(Duration::from_millis(200))
            .with_reconnect(ReconnectPolicy { max_attempts: 0, max_delay: Duration::from_millis(1) });

        let (tx, mut rx) = mpsc::channel(16);
        tokio::time::timeout(Duration::from_secs(5), adapter.spawn(tx))
            .await
            .expect("adapter should give up on a silent connection");
        let _ = done_tx.send(());

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events[0], TickerEvent::Connected);
        assert!(matches!(&events[1], TickerEvent::Error(reason) if reason.contains("no data")));
        assert!(matches!(events[2], TickerEvent::Closed { code: None, .. }));
        assert_eq!(events.last(), Some(&TickerEvent::NoReconnect));
    }

    #[tokio::test]
    async fn test_failed_connect_reports_and_retries() {
        // nothing listens on this port once the listener is dropped
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();

        let adapter = KiteTickerAdapter::new(&format!("ws://{addr}"), &creds(), vec![265])
            .unwrap()
            .with_reconnect(ReconnectPolicy { max_attempts: 2, max_delay: Duration::from_millis(1) });

        let (tx, mut rx) = mpsc::channel(16);
        adapter.spawn(tx).await;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let errors = events.iter().filter(|e| matches!(e, TickerEvent::Error(_))).count();
        assert_eq!(errors, 3);
        assert!(events.contains(&TickerEvent::Reconnecting { attempt: 1, delay: Duration::from_millis(1) }));
        assert!(events.contains(&TickerEvent::Reconnecting { attempt: 2, delay: Duration::from_millis(1) }));
        assert_eq!(events.last(), Some(&TickerEvent::NoReconnect));
    }
}
