// =============================================================================
// Notifier — outbound alert delivery
// =============================================================================
//
// The sniffer reports through this trait only; it never knows where alerts
// land. TelegramNotifier posts to the Bot API, LogNotifier is the fallback
// when no Telegram credentials are configured, and tests record calls.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::types::Instrument;

/// Sink for sniffer notifications.
#[async_trait]
pub trait MarketDataNotifier: Send + Sync {
    /// A session came up: the watch-list is built and streaming starts.
    async fn notify_start(&self, instruments: &[Instrument]) -> Result<()>;

    /// A last price deviated from the rolling candle mean beyond the
    /// configured threshold.
    async fn notify_high_change(&self, instrument: &Instrument, change_percent: f64) -> Result<()>;

    /// A session failed and the sniffer is about to back off and reconnect.
    async fn notify_error(&self, error: &anyhow::Error) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Telegram
// ---------------------------------------------------------------------------

/// Notifier posting HTML messages to the Telegram Bot API.
pub struct TelegramNotifier {
    client: reqwest::Client,
    send_message_url: String,
    chat_id: String,
    /// Include the full instrument list in the start message.
    send_instrument_list: bool,
}

impl TelegramNotifier {
    pub fn new(
        bot_token: impl AsRef<str>,
        chat_id: impl Into<String>,
        send_instrument_list: bool,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            send_message_url: format!(
                "https://api.telegram.org/bot{}/sendMessage",
                bot_token.as_ref()
            ),
            chat_id: chat_id.into(),
            send_instrument_list,
        }
    }

    async fn send_message(&self, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.send_message_url)
            .form(&[
                ("chat_id", self.chat_id.as_str()),
                ("text", text),
                ("parse_mode", "HTML"),
            ])
            .send()
            .await
            .context("failed to reach the Telegram API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendMessage failed: {status}: {body}");
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataNotifier for TelegramNotifier {
    async fn notify_start(&self, instruments: &[Instrument]) -> Result<()> {
        let mut message = format!(
            "Market data sniffer started {} — watching {} instruments",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            instruments.len()
        );
        if self.send_instrument_list {
            for instrument in instruments {
                message.push_str(&format!("\n<pre>{}</pre>", instrument.name));
            }
        }
        self.send_message(&message).await
    }

    async fn notify_high_change(&self, instrument: &Instrument, change_percent: f64) -> Result<()> {
        let arrow = if change_percent < 0.0 { "📉" } else { "📈" };
        self.send_message(&format!(
            "{arrow} {} {:+.2}%",
            instrument.name, change_percent
        ))
        .await
    }

    async fn notify_error(&self, error: &anyhow::Error) -> Result<()> {
        self.send_message(&format!("⚠️ sniffer session failed: {error:#}"))
            .await
    }
}

// ---------------------------------------------------------------------------
// Log fallback
// ---------------------------------------------------------------------------

/// Notifier writing to the tracing log. Used when no Telegram credentials
/// are configured.
pub struct LogNotifier;

#[async_trait]
impl MarketDataNotifier for LogNotifier {
    async fn notify_start(&self, instruments: &[Instrument]) -> Result<()> {
        info!(instruments = instruments.len(), "sniffer session started");
        Ok(())
    }

    async fn notify_high_change(&self, instrument: &Instrument, change_percent: f64) -> Result<()> {
        warn!(
            instrument = %instrument.name,
            change_percent = format!("{change_percent:+.2}%"),
            "high price change"
        );
        Ok(())
    }

    async fn notify_error(&self, error: &anyhow::Error) -> Result<()> {
        error!(error = %format!("{error:#}"), "sniffer session failed");
        Ok(())
    }
}
