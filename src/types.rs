// =============================================================================
// Shared types used across the market data sniffer
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A tradable share instrument on the watch-list.
///
/// Identity is immutable after registry construction; the `uid` is the key
/// every feed message carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instrument {
    /// Venue-wide unique identifier.
    pub uid: String,
    /// Human-readable display name.
    pub name: String,
    /// Venue-specific ticker symbol.
    pub ticker: String,
}

/// A single OHLCV candle over one subscription interval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub instrument_uid: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    /// Start of the candle interval.
    pub time: DateTime<Utc>,
}

/// Latest traded price for an instrument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastPrice {
    pub instrument_uid: String,
    pub price: Decimal,
    pub time: DateTime<Utc>,
}

/// Aggressor side of an executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeDirection {
    Buy,
    Sell,
    Unknown,
}

impl Default for TradeDirection {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "🟢"),
            Self::Sell => write!(f, "🔻"),
            Self::Unknown => write!(f, "❓"),
        }
    }
}

/// A single executed transaction from the trade channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    pub instrument_uid: String,
    pub price: Decimal,
    pub quantity: u64,
    pub direction: TradeDirection,
    pub time: DateTime<Utc>,
}

/// Candle subscription interval supported by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleInterval {
    OneMinute,
    FiveMinutes,
}

impl Default for CandleInterval {
    fn default() -> Self {
        Self::OneMinute
    }
}

impl std::fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OneMinute => write!(f, "1m"),
            Self::FiveMinutes => write!(f, "5m"),
        }
    }
}

/// One message from the live market data stream.
///
/// The three channels are multiplexed over a single stream; every message
/// is exactly one of these variants and dispatch matches exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Candle(Candle),
    LastPrice(LastPrice),
    Trade(Trade),
}

impl FeedMessage {
    /// The instrument this message belongs to.
    pub fn instrument_uid(&self) -> &str {
        match self {
            Self::Candle(c) => &c.instrument_uid,
            Self::LastPrice(p) => &p.instrument_uid,
            Self::Trade(t) => &t.instrument_uid,
        }
    }
}
