// =============================================================================
// Feed Gateway — REST + WebSocket implementation of MarketDataFeed
// =============================================================================
//
// REST (bearer token) serves the watch-list and candle history; a WebSocket
// carries the live candle/last-price/trade channels. Numeric values arrive
// as JSON strings and are parsed into `Decimal` without going through f64.
//
// A reader task owns the socket and forwards parsed messages into an mpsc
// channel; dropping the receiver tears the task down on its next send.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::types::{Candle, CandleInterval, FeedMessage, Instrument, LastPrice, Trade, TradeDirection};

use super::{FeedError, FeedReceiver, FeedResult, MarketDataFeed};

/// Capacity of the stream delivery channel.
const STREAM_CHANNEL_CAPACITY: usize = 256;

/// Gateway to the brokerage market data API.
#[derive(Clone)]
pub struct FeedGateway {
    base_url: String,
    ws_url: String,
    client: reqwest::Client,
}

impl FeedGateway {
    /// Create a new gateway.
    ///
    /// # Arguments
    /// * `base_url` — REST endpoint root, e.g. `https://api.example.com/v1`.
    /// * `ws_url`   — WebSocket endpoint for the market data stream.
    /// * `token`    — bearer token sent with every REST request.
    pub fn new(
        base_url: impl Into<String>,
        ws_url: impl Into<String>,
        token: impl AsRef<str>,
    ) -> Self {
        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {}", token.as_ref())) {
            default_headers.insert(reqwest::header::AUTHORIZATION, val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            ws_url: ws_url.into(),
            client,
        }
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> FeedResult<serde_json::Value> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| FeedError::Api(format!("GET {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(FeedError::Api(format!(
                "GET {url}: status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| FeedError::Api(format!("GET {url}: invalid JSON: {e}")))
    }
}

#[async_trait]
impl MarketDataFeed for FeedGateway {
    async fn list_watchable_instruments(&self) -> FeedResult<Vec<Instrument>> {
        let url = format!("{}/instruments/favorites", self.base_url);
        let root = self.get_json(&url, &[]).await?;

        let items = root["instruments"]
            .as_array()
            .ok_or_else(|| FeedError::Api("favorites response missing instruments".into()))?;

        // Only tradable shares are watchable; everything else on the
        // favorites list is skipped.
        let mut instruments = Vec::new();
        for item in items {
            let tradable = item["api_trade_available"].as_bool().unwrap_or(false);
            let kind = item["instrument_kind"].as_str().unwrap_or_default();
            if !tradable || kind != "share" {
                continue;
            }
            match parse_instrument(item) {
                Ok(instrument) => instruments.push(instrument),
                Err(e) => warn!(error = %e, "skipping malformed favorites entry"),
            }
        }

        info!(count = instruments.len(), "watch-list fetched");
        Ok(instruments)
    }

    async fn get_recent_candles(
        &self,
        instrument_uid: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: CandleInterval,
    ) -> FeedResult<Vec<Candle>> {
        let url = format!("{}/candles", self.base_url);
        let root = self
            .get_json(
                &url,
                &[
                    ("instrument_id", instrument_uid.to_string()),
                    ("from", from.to_rfc3339()),
                    ("to", to.to_rfc3339()),
                    ("interval", interval.to_string()),
                ],
            )
            .await?;

        let items = root["candles"]
            .as_array()
            .ok_or_else(|| FeedError::Api("candles response missing candles".into()))?;

        let mut candles = Vec::with_capacity(items.len());
        for item in items {
            match parse_candle(item, instrument_uid) {
                Ok(candle) => candles.push(candle),
                Err(e) => warn!(uid = %instrument_uid, error = %e, "skipping malformed candle"),
            }
        }

        debug!(uid = %instrument_uid, count = candles.len(), "historical candles fetched");
        Ok(candles)
    }

    async fn open_stream(
        &self,
        instrument_uids: &[String],
        interval: CandleInterval,
    ) -> FeedResult<FeedReceiver> {
        info!(url = %self.ws_url, instruments = instrument_uids.len(), "connecting to market data stream");

        let (ws_stream, _response) = connect_async(&self.ws_url)
            .await
            .map_err(|e| FeedError::Transport(format!("websocket connect: {e}")))?;

        let (mut write, mut read) = ws_stream.split();

        // One subscribe request per channel, all instruments at once.
        for request in subscription_requests(instrument_uids, interval) {
            write
                .send(Message::Text(request))
                .await
                .map_err(|e| FeedError::Transport(format!("subscribe request: {e}")))?;
        }

        info!("market data stream subscribed");

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => match parse_feed_message(&text) {
                        Ok(Some(message)) => {
                            if tx.send(Ok(message)).await.is_err() {
                                // Receiver gone; the session is over.
                                break;
                            }
                        }
                        // Keep-alives and subscription acks carry no payload.
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "failed to parse stream message");
                        }
                    },
                    // Tungstenite answers pings itself; other frames carry
                    // nothing we consume.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "market data stream read error");
                        let _ = tx
                            .send(Err(FeedError::Transport(format!("stream read: {e}"))))
                            .await;
                        break;
                    }
                    None => {
                        warn!("market data stream ended");
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Build the three channel subscription requests (candles, last prices,
/// trades) for the given instruments.
fn subscription_requests(instrument_uids: &[String], interval: CandleInterval) -> Vec<String> {
    vec![
        serde_json::json!({
            "subscribe_candles": {
                "instruments": instrument_uids,
                "interval": interval.to_string(),
                "waiting_close": true,
            }
        })
        .to_string(),
        serde_json::json!({
            "subscribe_last_prices": { "instruments": instrument_uids }
        })
        .to_string(),
        serde_json::json!({
            "subscribe_trades": { "instruments": instrument_uids }
        })
        .to_string(),
    ]
}

/// Parse one stream frame into a `FeedMessage`.
///
/// Returns `Ok(None)` for keep-alives and subscription acks. Expected shapes:
/// ```json
/// { "candle":     { "instrument_uid": "...", "open": "100.5", ... } }
/// { "last_price": { "instrument_uid": "...", "price": "101.2", "time": "..." } }
/// { "trade":      { "instrument_uid": "...", "price": "101.2", "quantity": 5,
///                   "direction": "buy", "time": "..." } }
/// ```
pub fn parse_feed_message(text: &str) -> Result<Option<FeedMessage>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse stream JSON")?;

    if let Some(candle) = root.get("candle") {
        let uid = parse_string(candle, "instrument_uid")?;
        return Ok(Some(FeedMessage::Candle(parse_candle(candle, &uid)?)));
    }

    if let Some(last_price) = root.get("last_price") {
        return Ok(Some(FeedMessage::LastPrice(LastPrice {
            instrument_uid: parse_string(last_price, "instrument_uid")?,
            price: parse_decimal(last_price, "price")?,
            time: parse_time(last_price, "time")?,
        })));
    }

    if let Some(trade) = root.get("trade") {
        return Ok(Some(FeedMessage::Trade(Trade {
            instrument_uid: parse_string(trade, "instrument_uid")?,
            price: parse_decimal(trade, "price")?,
            quantity: trade["quantity"]
                .as_u64()
                .context("missing field trade.quantity")?,
            direction: parse_direction(trade["direction"].as_str()),
            time: parse_time(trade, "time")?,
        })));
    }

    // Keep-alive / subscription ack frames.
    Ok(None)
}

fn parse_instrument(value: &serde_json::Value) -> Result<Instrument> {
    Ok(Instrument {
        uid: parse_string(value, "uid")?,
        name: parse_string(value, "name")?,
        ticker: parse_string(value, "ticker")?,
    })
}

fn parse_candle(value: &serde_json::Value, instrument_uid: &str) -> Result<Candle> {
    Ok(Candle {
        instrument_uid: instrument_uid.to_string(),
        open: parse_decimal(value, "open")?,
        high: parse_decimal(value, "high")?,
        low: parse_decimal(value, "low")?,
        close: parse_decimal(value, "close")?,
        volume: value["volume"].as_u64().context("missing field volume")?,
        time: parse_time(value, "time")?,
    })
}

fn parse_direction(raw: Option<&str>) -> TradeDirection {
    match raw {
        Some("buy") => TradeDirection::Buy,
        Some("sell") => TradeDirection::Sell,
        _ => TradeDirection::Unknown,
    }
}

fn parse_string(value: &serde_json::Value, name: &str) -> Result<String> {
    value[name]
        .as_str()
        .map(str::to_string)
        .with_context(|| format!("missing field {name}"))
}

/// The feed sends prices as JSON strings to preserve precision; accept plain
/// numbers as well.
fn parse_decimal(value: &serde_json::Value, name: &str) -> Result<Decimal> {
    match &value[name] {
        serde_json::Value::String(s) => s
            .parse::<Decimal>()
            .with_context(|| format!("failed to parse {name} as decimal: {s}")),
        serde_json::Value::Number(n) => n
            .to_string()
            .parse::<Decimal>()
            .with_context(|| format!("field {name} is not a valid decimal")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

fn parse_time(value: &serde_json::Value, name: &str) -> Result<DateTime<Utc>> {
    let raw = value[name]
        .as_str()
        .with_context(|| format!("missing field {name}"))?;
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("failed to parse {name} as RFC 3339: {raw}"))?;
    Ok(parsed.with_timezone(&Utc))
}
