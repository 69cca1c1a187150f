// =============================================================================
// Market Data Feed — the narrow interface the sniffer consumes
// =============================================================================
//
// The sniffer never talks to a venue directly; it sees a watch-list, a
// history endpoint, and a live stream delivered over an mpsc channel. Tests
// substitute a scripted implementation.
// =============================================================================

pub mod gateway;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{Candle, CandleInterval, FeedMessage, Instrument};

pub use gateway::FeedGateway;

/// Failures at the feed boundary.
///
/// Everything here is recoverable: the sniffer reports it and reconnects
/// after the fixed backoff. Per-message problems never surface as a
/// `FeedError`; they are logged and dropped at message granularity.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    /// Connection lost, subscribe rejected, stream ended.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Watch-list or history request failed.
    #[error("feed api error: {0}")]
    Api(String),
}

pub type FeedResult<T> = Result<T, FeedError>;

/// Messages (or a terminal transport error) from one live subscription.
pub type FeedReceiver = mpsc::Receiver<FeedResult<FeedMessage>>;

/// Abstract market data source: watch-list, candle history, and the live
/// candle/last-price/trade stream.
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Fetch the watch-list, already filtered to tradable share instruments.
    async fn list_watchable_instruments(&self) -> FeedResult<Vec<Instrument>>;

    /// Fetch recent candles for one instrument over `[from, to]`.
    async fn get_recent_candles(
        &self,
        instrument_uid: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: CandleInterval,
    ) -> FeedResult<Vec<Candle>>;

    /// Subscribe to the candle, last-price, and trade channels for all given
    /// instruments and return the receiving end of the stream. The channel
    /// closing means the stream ended.
    async fn open_stream(
        &self,
        instrument_uids: &[String],
        interval: CandleInterval,
    ) -> FeedResult<FeedReceiver>;
}
