// Source: Kite Connect WebSocket streaming (binary market data + JSON postbacks)
//
// Binary frame layout (all integers big-endian):
//   [u16 packet count] then per packet [u16 length][payload]
//   payload[0..4]  instrument token
//   payload[4..8]  last traded price in the segment's minor unit
// Index packets are 8 (ltp), 28 (quote) or 32 (full) bytes.
// Everything else is 8 (ltp), 44 (quote) or 184 (full) bytes.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RelayError, RelayResult};

// Exchange segment ids carried in the low byte of an instrument token
const SEGMENT_CDS: u32 = 3;
const SEGMENT_BCD: u32 = 6;
const SEGMENT_INDICES: u32 = 9;

const LTP_PACKET_LEN: usize = 8;
const INDEX_QUOTE_PACKET_LEN: usize = 28;
const INDEX_FULL_PACKET_LEN: usize = 32;
const QUOTE_PACKET_LEN: usize = 44;
const FULL_PACKET_LEN: usize = 184;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TickMode {
    Ltp,
    Quote,
    Full,
}

impl TickMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            TickMode::Ltp => "ltp",
            TickMode::Quote => "quote",
            TickMode::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ohlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// One decoded price update.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub instrument_token: u32,
    pub mode: TickMode,
    pub tradable: bool,
    pub last_price: f64,
    /// Session OHLC, present on index quote/full packets.
    pub ohlc: Option<Ohlc>,
    /// Percentage change from the previous close, present when OHLC is.
    pub change: Option<f64>,
    /// Exchange timestamp (unix seconds), present on index full packets.
    pub exchange_timestamp: Option<u32>,
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes = buf.get(at..at + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_i32(buf: &[u8], at: usize) -> Option<i32> {
    read_u32(buf, at).map(|v| v as i32)
}

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    let bytes = buf.get(at..at + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Prices arrive as integers in the segment's minor unit.
pub fn price_divisor(instrument_token: u32) -> f64 {
    match instrument_token & 0xff {
        SEGMENT_CDS => 10_000_000.0,
        SEGMENT_BCD => 10_000.0,
        _ => 100.0,
    }
}

impl Tick {
    /// Decode a single packet payload.
    pub fn from_packet(packet: &[u8]) -> RelayResult<Tick> {
        let (token, raw_ltp) = match (read_u32(packet, 0), read_i32(packet, 4)) {
            (Some(token), Some(ltp)) => (token, ltp),
            _ => {
                return Err(RelayError::MalformedFrame(format!(
                    "packet of {} bytes is shorter than {}",
                    packet.len(),
                    LTP_PACKET_LEN
                )))
            }
        };

        let segment = token & 0xff;
        let divisor = price_divisor(token);
        let price = |at: usize| read_i32(packet, at).map(|v| f64::from(v) / divisor);

        let mut tick = Tick {
            instrument_token: token,
            mode: TickMode::Ltp,
            tradable: segment != SEGMENT_INDICES,
            last_price: f64::from(raw_ltp) / divisor,
            ohlc: None,
            change: None,
            exchange_timestamp: None,
        };

        match (segment == SEGMENT_INDICES, packet.len()) {
            (_, LTP_PACKET_LEN) => {}
            (true, INDEX_QUOTE_PACKET_LEN) | (true, INDEX_FULL_PACKET_LEN) => {
                tick.mode = if packet.len() == INDEX_FULL_PACKET_LEN {
                    TickMode::Full
                } else {
                    TickMode::Quote
                };
                // high, low, open, close, change
                if let (Some(high), Some(low), Some(open), Some(close)) =
                    (price(8), price(12), price(16), price(20))
                {
                    tick.ohlc = Some(Ohlc { open, high, low, close });
                    if close != 0.0 {
                        tick.change = Some((tick.last_price - close) * 100.0 / close);
                    }
                }
                if tick.mode == TickMode::Full {
                    tick.exchange_timestamp = read_u32(packet, 28);
                }
            }
            (false, QUOTE_PACKET_LEN) => tick.mode = TickMode::Quote,
            (false, FULL_PACKET_LEN) => tick.mode = TickMode::Full,
            (_, len) => {
                debug!(token, len, "unrecognised packet length, keeping ltp only");
            }
        }

        Ok(tick)
    }
}

/// Decode one binary WebSocket frame into ticks.
///
/// A packet that claims more bytes than the frame holds ends decoding; what
/// was decoded up to that point is returned. Never panics on hostile input.
pub fn decode_frame(frame: &[u8]) -> Vec<Tick> {
    let Some(count) = read_u16(frame, 0) else {
        return Vec::new();
    };

    let mut ticks = Vec::with_capacity(usize::from(count));
    let mut offset = 2;
    for _ in 0..count {
        let Some(len) = read_u16(frame, offset) else {
            debug!(offset, "frame truncated before packet length");
            break;
        };
        offset += 2;
        let Some(packet) = frame.get(offset..offset + usize::from(len)) else {
            debug!(offset, len, frame_len = frame.len(), "frame truncated inside packet");
            break;
        };
        offset += usize::from(len);

        match Tick::from_packet(packet) {
            Ok(tick) => ticks.push(tick),
            Err(e) => debug!(error = %e, "skipping packet"),
        }
    }
    ticks
}

/// Heartbeats are single-byte binary frames.
pub fn is_heartbeat(frame: &[u8]) -> bool {
    frame.len() == 1
}

/// Commands sent to the ticker (`{"a": action, "v": value}`).
#[derive(Debug, Serialize)]
pub struct TickerCommand {
    pub a: &'static str,
    pub v: serde_json::Value,
}

impl TickerCommand {
    pub fn subscribe(tokens: &[u32]) -> Self {
        Self { a: "subscribe", v: serde_json::json!(tokens) }
    }

    pub fn set_mode(mode: TickMode, tokens: &[u32]) -> Self {
        Self { a: "mode", v: serde_json::json!([mode.as_str(), tokens]) }
    }
}

/// JSON text frames pushed by the ticker alongside binary ticks,
/// e.g. `{"type": "error", "data": "..."}`.
#[derive(Debug, Deserialize)]
pub struct TextMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl TextMessage {
    pub fn parse(text: &str) -> RelayResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn is_error(&self) -> bool {
        self.kind == "error"
    }

    /// `data` as display text, without JSON quoting for plain strings.
    pub fn data_text(&self) -> String {
        match &self.data {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
