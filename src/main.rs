// =============================================================================
// Market Data Sniffer — Main Entry Point
// =============================================================================
//
// Watches a brokerage watch-list over a live candle/last-price/trade stream,
// keeps rolling per-instrument statistics, and pushes threshold alerts to
// Telegram (or the log when no bot is configured).
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod alert;
mod feed;
mod market_data;
mod notifier;
mod settings;
mod sniffer;
mod types;
mod volume_monitor;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::feed::FeedGateway;
use crate::notifier::{LogNotifier, MarketDataNotifier, TelegramNotifier};
use crate::settings::SnifferSettings;
use crate::sniffer::MarketDataSniffer;

/// Settings file sitting next to the binary.
const SETTINGS_PATH: &str = "sniffer_settings.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut settings = SnifferSettings::load(SETTINGS_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load settings, using defaults");
        SnifferSettings::default()
    });

    // Override the alert threshold from env if available.
    if let Ok(raw) = std::env::var("SNIFFER_CHANGE_PERCENT_THRESHOLD") {
        match raw.parse::<f64>() {
            Ok(threshold) => settings.change_percent_threshold = threshold,
            Err(e) => warn!(value = %raw, error = %e, "ignoring bad threshold override"),
        }
    }

    info!(
        last_candles_count = settings.last_candles_count,
        last_trades_count = settings.last_trades_count,
        candle_interval = %settings.candle_interval,
        change_percent_threshold = settings.change_percent_threshold,
        "sniffer configured"
    );

    // ── 2. Feed gateway ──────────────────────────────────────────────────
    let base_url = std::env::var("MARKETDATA_BASE_URL")
        .unwrap_or_else(|_| "https://api.marketdata.example/v1".into());
    let ws_url = std::env::var("MARKETDATA_WS_URL")
        .unwrap_or_else(|_| "wss://stream.marketdata.example/v1".into());
    let token = std::env::var("MARKETDATA_TOKEN").unwrap_or_default();
    if token.is_empty() {
        warn!("MARKETDATA_TOKEN is not set; feed requests will be unauthenticated");
    }

    let gateway = Arc::new(FeedGateway::new(base_url, ws_url, token));

    // ── 3. Notifier ──────────────────────────────────────────────────────
    let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default();
    let chat_id = std::env::var("TELEGRAM_CHAT_ID").unwrap_or_default();

    let notifier: Arc<dyn MarketDataNotifier> = if !bot_token.is_empty() && !chat_id.is_empty() {
        info!("alerts go to Telegram");
        Arc::new(TelegramNotifier::new(
            bot_token,
            chat_id,
            settings.send_instrument_list_on_start,
        ))
    } else {
        info!("no Telegram credentials; alerts go to the log");
        Arc::new(LogNotifier)
    };

    // ── 4. Run the sniffer ───────────────────────────────────────────────
    let sniffer = Arc::new(MarketDataSniffer::new(gateway, notifier, settings));

    let runner = Arc::clone(&sniffer);
    let handle = tokio::spawn(async move { runner.run().await });

    info!("sniffer running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    sniffer.stop();
    handle.await??;

    info!("market data sniffer shut down complete.");
    Ok(())
}
