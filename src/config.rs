// Process configuration: CLI flags with environment fallbacks (.env is loaded first by main).
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum::http::HeaderValue;
use clap::Parser;

use crate::error::{RelayError, RelayResult};

pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:4200";
pub const DEFAULT_TICKER_URL: &str = "wss://ws.kite.trade";
pub const DEFAULT_INSTRUMENTS_URL: &str = "https://api.kite.trade/instruments";
pub const DEFAULT_CATALOG_REFRESH_SECS: u64 = 60 * 60;
// The ticker heartbeats every second; silence this long means a dead connection.
pub const DEFAULT_TICKER_READ_TIMEOUT_SECS: u64 = 5;

#[derive(Parser, Clone)]
#[command(name = "kite-index-relay", version, about = "Relays live Kite index LTPs and the instrument list to a local front end")]
pub struct RelayConfig {
    /// Kite Connect API key
    #[arg(long, env = "KITE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Kite Connect access token (obtained out of band)
    #[arg(long, env = "KITE_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(long, env = "RELAY_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// The only browser origin allowed to call the API
    #[arg(long, env = "RELAY_ALLOWED_ORIGIN", default_value = DEFAULT_ALLOWED_ORIGIN)]
    pub allowed_origin: String,

    #[arg(long, env = "KITE_TICKER_URL", default_value = DEFAULT_TICKER_URL)]
    pub ticker_url: String,

    #[arg(long, env = "KITE_INSTRUMENTS_URL", default_value = DEFAULT_INSTRUMENTS_URL)]
    pub instruments_url: String,

    #[arg(long, env = "RELAY_CATALOG_REFRESH_SECS", default_value_t = DEFAULT_CATALOG_REFRESH_SECS)]
    pub catalog_refresh_secs: u64,

    /// Reconnect when the ticker sends nothing (not even a heartbeat) for this long
    #[arg(long, env = "KITE_READ_TIMEOUT_SECS", default_value_t = DEFAULT_TICKER_READ_TIMEOUT_SECS)]
    pub ticker_read_timeout_secs: u64,

    /// Default tracing filter, overridden by RUST_LOG
    #[arg(long, default_value = "info,kite_index_relay=debug")]
    pub log_filter: String,
}

/// Credentials that passed validation. Never printed in full.
#[derive(Clone)]
pub struct KiteCredentials {
    pub api_key: String,
    pub access_token: String,
}

impl fmt::Debug for KiteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KiteCredentials")
            .field("api_key", &redact(&self.api_key))
            .field("access_token", &redact(&self.access_token))
            .finish()
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("api_key", &self.api_key.as_deref().map(redact))
            .field("access_token", &self.access_token.as_deref().map(redact))
            .field("port", &self.port)
            .field("bind", &self.bind)
            .field("allowed_origin", &self.allowed_origin)
            .field("ticker_url", &self.ticker_url)
            .field("instruments_url", &self.instruments_url)
            .field("catalog_refresh_secs", &self.catalog_refresh_secs)
            .field("ticker_read_timeout_secs", &self.ticker_read_timeout_secs)
            .finish()
    }
}

// Keep the first four characters so operators can tell keys apart in logs.
fn redact(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{visible}***")
}

fn required(value: Option<&str>, name: &'static str) -> RelayResult<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(RelayError::MissingCredential(name)),
    }
}

impl RelayConfig {
    /// Both credentials must be present and non-blank, otherwise startup is fatal.
    pub fn credentials(&self) -> RelayResult<KiteCredentials> {
        Ok(KiteCredentials {
            api_key: required(self.api_key.as_deref(), "KITE_API_KEY")?,
            access_token: required(self.access_token.as_deref(), "KITE_ACCESS_TOKEN")?,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn catalog_refresh_interval(&self) -> RelayResult<Duration> {
        if self.catalog_refresh_secs == 0 {
            return Err(RelayError::InvalidConfig(
                "RELAY_CATALOG_REFRESH_SECS must be greater than zero".into(),
            ));
        }
        Ok(Duration::from_secs(self.catalog_refresh_secs))
    }

    pub fn ticker_read_timeout(&self) -> RelayResult<Duration> {
        if self.ticker_read_timeout_secs == 0 {
            return Err(RelayError::InvalidConfig("KITE_READ_TIMEOUT_SECS must be greater than zero".into()));
        }
        Ok(Duration::from_secs(self.ticker_read_timeout_secs))
    }

    pub fn allowed_origin_header(&self) -> RelayResult<HeaderValue> {
        let origin = self.allowed_origin.trim().trim_end_matches('/');
        if !(origin.starts_with("http://") || origin.starts_with("https://")) {
            return Err(RelayError::InvalidConfig(format!(
                "allowed origin must be an http(s) origin, got {:?}",
                self.allowed_origin
            )));
        }
        HeaderValue::from_str(origin)
            .map_err(|e| RelayError::InvalidConfig(format!("allowed origin {origin:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> RelayConfig {
        let mut argv = vec!["kite-index-relay"];
        argv.extend_from_slice(args);
        RelayConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = parse(&["--api-key", "k", "--access-token", "t"]);
        assert_eq!(cfg.allowed_origin, DEFAULT_ALLOWED_ORIGIN);
        assert_eq!(cfg.ticker_url, DEFAULT_TICKER_URL);
        assert_eq!(cfg.instruments_url, DEFAULT_INSTRUMENTS_URL);
        assert_eq!(cfg.catalog_refresh_interval().unwrap(), Duration::from_secs(3600));
        assert_eq!(cfg.ticker_read_timeout().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_credentials_are_fatal() {
        let cfg = parse(&["--api-key", "k", "--access-token", "   "]);
        match cfg.credentials() {
            Err(RelayError::MissingCredential(name)) => assert_eq!(name, "KITE_ACCESS_TOKEN"),
            other => panic!("expected missing credential, got {:?}", other.map(|_| ())),
        }

        let mut cfg = parse(&[]);
        cfg.api_key = None;
        cfg.access_token = Some("t".into());
        assert!(matches!(cfg.credentials(), Err(RelayError::MissingCredential("KITE_API_KEY"))));
    }

    #[test]
    fn test_credentials_are_trimmed_and_redacted() {
        let cfg = parse(&["--api-key", " abcdefgh ", "--access-token", "secret-token"]);
        let creds = cfg.credentials().unwrap();
        assert_eq!(creds.api_key, "abcdefgh");
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("secret-token"));
        assert!(shown.contains("abcd***"));
    }

    #[test]
    fn test_allowed_origin_validation() {
        let mut cfg = parse(&["--allowed-origin", "http://localhost:4200/"]);
        assert_eq!(cfg.allowed_origin_header().unwrap().to_str().unwrap(), "http://localhost:4200");

        cfg.allowed_origin = "localhost:4200".into();
        assert!(matches!(cfg.allowed_origin_header(), Err(RelayError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_refresh_interval_rejected() {
        let cfg = parse(&["--catalog-refresh-secs", "0"]);
        assert!(cfg.catalog_refresh_interval().is_err());

        let cfg = parse(&["--ticker-read-timeout-secs", "0"]);
        assert!(cfg.ticker_read_timeout().is_err());
    }
}
