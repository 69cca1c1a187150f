// =============================================================================
// Market Data Sniffer — streaming ingestion with failure recovery
// =============================================================================
//
// One session = fetch the watch-list, build the registry, seed candle
// history, notify, then consume the live stream until it fails or `stop()`
// is called. Any session failure is reported and retried after a fixed
// backoff; the registry is rebuilt from scratch on every attempt.
//
// The streaming loop is the single writer of every instrument's rolling
// statistics; the volume monitor reads them concurrently through the
// per-instrument locks.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::alert::{is_price_alert, is_volume_alert};
use crate::feed::MarketDataFeed;
use crate::market_data::InstrumentRegistry;
use crate::notifier::MarketDataNotifier;
use crate::settings::SnifferSettings;
use crate::types::FeedMessage;
use crate::volume_monitor::run_volume_monitor;

/// Long-running ingestion component: owns the subscription lifecycle and the
/// per-instrument statistics of the current session.
pub struct MarketDataSniffer {
    feed: Arc<dyn MarketDataFeed>,
    notifier: Arc<dyn MarketDataNotifier>,
    settings: SnifferSettings,
    is_running: Arc<AtomicBool>,
    /// Registry of the current session, for observation only. Replaced
    /// wholesale on every reconnect.
    current_registry: RwLock<Option<Arc<InstrumentRegistry>>>,
}

impl MarketDataSniffer {
    pub fn new(
        feed: Arc<dyn MarketDataFeed>,
        notifier: Arc<dyn MarketDataNotifier>,
        settings: SnifferSettings,
    ) -> Self {
        Self {
            feed,
            notifier,
            settings,
            is_running: Arc::new(AtomicBool::new(false)),
            current_registry: RwLock::new(None),
        }
    }

    /// Request a cooperative shutdown. Idempotent; the streaming loop and
    /// the volume monitor observe the flag at their next check point,
    /// bounded by the stream read timeout.
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// The registry of the session currently streaming, if any.
    pub fn registry(&self) -> Option<Arc<InstrumentRegistry>> {
        self.current_registry.read().clone()
    }

    /// Run sessions until `stop()` is called.
    ///
    /// Idempotent while already running: a duplicate call logs and returns
    /// without opening a second subscription. Each failed session is
    /// reported once through the notifier, then retried after the fixed
    /// `on_error_sleep` backoff — no exponential backoff.
    pub async fn run(&self) -> Result<()> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!("sniffer already running; ignoring duplicate start");
            return Ok(());
        }

        info!("sniffer starting");

        while self.is_running.load(Ordering::SeqCst) {
            match self.run_session().await {
                // A session only returns cleanly on cooperative stop.
                Ok(()) => break,
                Err(e) => {
                    error!(
                        error = %format!("{e:#}"),
                        backoff_secs = self.settings.on_error_sleep_secs,
                        "session failed — recovering"
                    );
                    if let Err(notify_err) = self.notifier.notify_error(&e).await {
                        warn!(error = %format!("{notify_err:#}"), "failed to report session error");
                    }
                    tokio::time::sleep(self.settings.on_error_sleep()).await;
                }
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        *self.current_registry.write() = None;
        info!("sniffer stopped");
        Ok(())
    }

    /// One ingestion attempt: watch-list, registry, history seed, volume
    /// monitor, start notification, streaming loop.
    async fn run_session(&self) -> Result<()> {
        info!("connecting to feed");
        let instruments = self
            .feed
            .list_watchable_instruments()
            .await
            .context("fetching watch-list")?;

        if instruments.is_empty() {
            warn!("watch-list is empty; streaming anyway");
        }

        let registry = Arc::new(InstrumentRegistry::new(instruments, &self.settings));
        *self.current_registry.write() = Some(Arc::clone(&registry));

        self.seed_history(&registry)
            .await
            .context("seeding candle history")?;

        // The monitor is scoped to this session: it exits when the sniffer
        // stops or when this session ends, so reconnects do not accumulate
        // monitor tasks.
        let session_done = Arc::new(AtomicBool::new(false));
        tokio::spawn(run_volume_monitor(
            Arc::clone(&registry),
            Arc::clone(&self.is_running),
            Arc::clone(&session_done),
            self.settings.volume_monitor_interval(),
        ));

        let result = self.stream_session(&registry).await;
        session_done.store(true, Ordering::SeqCst);
        result
    }

    /// Pre-warm every instrument's rolling windows with recent history,
    /// oldest candle first.
    async fn seed_history(&self, registry: &InstrumentRegistry) -> Result<()> {
        let to = Utc::now();
        let from = to - self.settings.history_span();

        for entry in registry.entries() {
            let candles = self
                .feed
                .get_recent_candles(
                    &entry.instrument.uid,
                    from,
                    to,
                    self.settings.candle_interval,
                )
                .await
                .with_context(|| format!("fetching history for {}", entry.instrument.ticker))?;

            registry.seed_candles(&entry.instrument.uid, candles)?;
        }

        info!(instruments = registry.len(), "candle history seeded");
        Ok(())
    }

    /// Consume the live stream until it fails or the running flag clears.
    async fn stream_session(&self, registry: &Arc<InstrumentRegistry>) -> Result<()> {
        self.notifier
            .notify_start(&registry.instruments())
            .await
            .context("sending start notification")?;

        let uids: Vec<String> = registry
            .entries()
            .map(|e| e.instrument.uid.clone())
            .collect();

        let mut stream = self
            .feed
            .open_stream(&uids, self.settings.candle_interval)
            .await
            .context("opening market data stream")?;

        info!(instruments = uids.len(), "streaming");

        while self.is_running.load(Ordering::SeqCst) {
            match tokio::time::timeout(self.settings.stream_read_timeout(), stream.recv()).await {
                // Nothing arrived within the bound; re-check the flag so
                // stop() is never blocked on a silent feed.
                Err(_) => continue,
                Ok(None) => anyhow::bail!("market data stream ended"),
                Ok(Some(Err(e))) => return Err(e).context("market data stream failed"),
                Ok(Some(Ok(message))) => {
                    // Per-message boundary: a malformed or unexpected
                    // message is logged and dropped, never fatal.
                    if let Err(e) = self.handle_message(registry, message).await {
                        warn!(error = %format!("{e:#}"), "dropping unprocessable message");
                    }
                }
            }
        }

        Ok(())
    }

    /// Apply one stream message to its instrument's statistics and evaluate
    /// the alert conditions.
    async fn handle_message(
        &self,
        registry: &InstrumentRegistry,
        message: FeedMessage,
    ) -> Result<()> {
        let entry = registry.get(message.instrument_uid())?;

        match message {
            FeedMessage::Candle(candle) => {
                let mean = entry.stats.write().observe_candle(candle);
                debug!(
                    instrument = %entry.instrument.name,
                    candle_mean = %mean,
                    "candle observed"
                );
            }

            FeedMessage::LastPrice(last_price) => {
                // Compute under the read lock, release it before notifying.
                let change_percent = {
                    let stats = entry.stats.read();
                    match stats.rolling_candle_mean() {
                        Some(mean) if !mean.is_zero() => {
                            ((last_price.price - mean) / mean * Decimal::from(100)).to_f64()
                        }
                        // No candles yet, or a zero mean: skip the check.
                        _ => None,
                    }
                };

                match change_percent {
                    Some(change_percent)
                        if is_price_alert(change_percent, self.settings.change_percent_threshold) =>
                    {
                        info!(
                            instrument = %entry.instrument.name,
                            change_percent = format!("{change_percent:+.2}%"),
                            "high price change"
                        );
                        self.notifier
                            .notify_high_change(&entry.instrument, change_percent)
                            .await
                            .context("sending high-change alert")?;
                    }
                    Some(_) => {}
                    None => {
                        debug!(
                            instrument = %entry.instrument.name,
                            "no rolling candle mean yet; skipping price check"
                        );
                    }
                }
            }

            FeedMessage::Trade(trade) => {
                let direction = trade.direction;
                let quantity = trade.quantity;
                let observed = (trade.price * Decimal::from(trade.quantity))
                    .to_f64()
                    .unwrap_or(0.0);

                let baseline = {
                    let mut stats = entry.stats.write();
                    stats.observe_trade(trade);
                    stats.mean_volume_per_second()
                };

                // Side-channel signal only; never escalated to the notifier.
                if is_volume_alert(observed, baseline) {
                    info!(
                        instrument = %entry.instrument.name,
                        direction = %direction,
                        quantity,
                        observed,
                        baseline,
                        "volume outlier"
                    );
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedError, FeedReceiver, FeedResult};
    use crate::types::{Candle, CandleInterval, Instrument, LastPrice, Trade, TradeDirection};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    // ── Fixtures ────────────────────────────────────────────────────────

    fn instrument(uid: &str) -> Instrument {
        Instrument {
            uid: uid.into(),
            name: format!("Share {uid}"),
            ticker: uid.to_uppercase(),
        }
    }

    fn flat_candle(uid: &str, value: Decimal, minute: i64) -> Candle {
        Candle {
            instrument_uid: uid.into(),
            open: value,
            high: value,
            low: value,
            close: value,
            volume: 10,
            time: Utc.timestamp_opt(minute * 60, 0).unwrap(),
        }
    }

    fn last_price(uid: &str, price: Decimal) -> FeedMessage {
        FeedMessage::LastPrice(LastPrice {
            instrument_uid: uid.into(),
            price,
            time: Utc.timestamp_opt(600, 0).unwrap(),
        })
    }

    fn trade(uid: &str, quantity: u64) -> FeedMessage {
        FeedMessage::Trade(Trade {
            instrument_uid: uid.into(),
            price: dec!(10),
            quantity,
            direction: TradeDirection::Buy,
            time: Utc.timestamp_opt(600, 0).unwrap(),
        })
    }

    fn test_settings() -> SnifferSettings {
        SnifferSettings {
            on_error_sleep_secs: 1,
            ..SnifferSettings::default()
        }
    }

    // ── Scripted feed ───────────────────────────────────────────────────

    /// One scripted session of the mock feed.
    struct SessionScript {
        messages: Vec<FeedResult<FeedMessage>>,
        /// Keep the stream open after the script so the session only ends
        /// via `stop()`. When false the channel closes, which the sniffer
        /// treats as a transport failure.
        keep_open: bool,
    }

    struct MockFeed {
        instruments: Vec<Instrument>,
        history: Vec<Candle>,
        sessions: Mutex<VecDeque<SessionScript>>,
        parked_senders: Mutex<Vec<mpsc::Sender<FeedResult<FeedMessage>>>>,
        watchlist_calls: AtomicUsize,
        streams_opened: AtomicUsize,
    }

    impl MockFeed {
        fn new(
            instruments: Vec<Instrument>,
            history: Vec<Candle>,
            sessions: Vec<SessionScript>,
        ) -> Arc<Self> {
            Arc::new(Self {
                instruments,
                history,
                sessions: Mutex::new(sessions.into()),
                parked_senders: Mutex::new(Vec::new()),
                watchlist_calls: AtomicUsize::new(0),
                streams_opened: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MarketDataFeed for MockFeed {
        async fn list_watchable_instruments(&self) -> FeedResult<Vec<Instrument>> {
            self.watchlist_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.instruments.clone())
        }

        async fn get_recent_candles(
            &self,
            instrument_uid: &str,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
            _interval: CandleInterval,
        ) -> FeedResult<Vec<Candle>> {
            Ok(self
                .history
                .iter()
                .filter(|c| c.instrument_uid == instrument_uid)
                .cloned()
                .collect())
        }

        async fn open_stream(
            &self,
            _instrument_uids: &[String],
            _interval: CandleInterval,
        ) -> FeedResult<FeedReceiver> {
            self.streams_opened.fetch_add(1, Ordering::SeqCst);

            let script = self
                .sessions
                .lock()
                .pop_front()
                .unwrap_or(SessionScript { messages: Vec::new(), keep_open: true });

            let (tx, rx) = mpsc::channel(64);
            for item in script.messages {
                tx.try_send(item).expect("script exceeds channel capacity");
            }
            if script.keep_open {
                self.parked_senders.lock().push(tx);
            }
            Ok(rx)
        }
    }

    // ── Recording notifier ──────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingNotifier {
        starts: AtomicUsize,
        errors: AtomicUsize,
        high_changes: Mutex<Vec<(String, f64)>>,
    }

    #[async_trait]
    impl MarketDataNotifier for RecordingNotifier {
        async fn notify_start(&self, _instruments: &[Instrument]) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn notify_high_change(
            &self,
            instrument: &Instrument,
            change_percent: f64,
        ) -> Result<()> {
            self.high_changes
                .lock()
                .push((instrument.uid.clone(), change_percent));
            Ok(())
        }

        async fn notify_error(&self, _error: &anyhow::Error) -> Result<()> {
            self.errors.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Poll until `condition` holds; panics after ~5 s of paused-clock time.
    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..1000 {
            if condition() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn spawn_sniffer(
        feed: Arc<MockFeed>,
        notifier: Arc<RecordingNotifier>,
        settings: SnifferSettings,
    ) -> (Arc<MarketDataSniffer>, tokio::task::JoinHandle<Result<()>>) {
        let sniffer = Arc::new(MarketDataSniffer::new(feed, notifier, settings));
        let runner = Arc::clone(&sniffer);
        let handle = tokio::spawn(async move { runner.run().await });
        (sniffer, handle)
    }

    // ── Tests ───────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn seeds_history_and_alerts_above_threshold_only() {
        // Rolling mean seeded to 100; threshold 0.5 %. 100.4 must not
        // alert, 100.6 must.
        let history: Vec<Candle> = (0..5).map(|i| flat_candle("a", dec!(100), i)).collect();
        let feed = MockFeed::new(
            vec![instrument("a")],
            history,
            vec![SessionScript {
                messages: vec![
                    Ok(last_price("a", dec!(100.4))),
                    Ok(last_price("a", dec!(100.6))),
                ],
                keep_open: true,
            }],
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let (sniffer, handle) = spawn_sniffer(Arc::clone(&feed), Arc::clone(&notifier), test_settings());

        wait_until(|| !notifier.high_changes.lock().is_empty()).await;

        let changes = notifier.high_changes.lock().clone();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "a");
        assert!((changes[0].1 - 0.6).abs() < 1e-9);

        sniffer.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_rolling_mean_skips_price_check() {
        // All-zero history gives a zero mean; the comparison is skipped
        // rather than dividing by zero.
        let history: Vec<Candle> = (0..5).map(|i| flat_candle("a", dec!(0), i)).collect();
        let feed = MockFeed::new(
            vec![instrument("a")],
            history,
            vec![SessionScript {
                messages: vec![Ok(last_price("a", dec!(50))), Ok(trade("a", 3))],
                keep_open: true,
            }],
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let (sniffer, handle) = spawn_sniffer(Arc::clone(&feed), Arc::clone(&notifier), test_settings());

        // The trade after the price message proves the loop survived it.
        wait_until(|| {
            sniffer
                .registry()
                .map(|r| r.get("a").map(|e| e.stats.read().trade_count()) == Ok(1))
                .unwrap_or(false)
        })
        .await;

        assert!(notifier.high_changes.lock().is_empty());
        sniffer.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_message_does_not_terminate_streaming() {
        // An instrument id absent from the registry is dropped; the
        // following valid messages still land.
        let feed = MockFeed::new(
            vec![instrument("a")],
            Vec::new(),
            vec![SessionScript {
                messages: vec![
                    Ok(trade("ghost", 5)),
                    Ok(FeedMessage::Candle(flat_candle("a", dec!(42), 1))),
                    Ok(trade("a", 7)),
                ],
                keep_open: true,
            }],
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let (sniffer, handle) = spawn_sniffer(Arc::clone(&feed), Arc::clone(&notifier), test_settings());

        wait_until(|| {
            sniffer
                .registry()
                .and_then(|r| {
                    r.get("a")
                        .ok()
                        .map(|e| e.stats.read().candle_count() == 1 && e.stats.read().trade_count() == 1)
                })
                .unwrap_or(false)
        })
        .await;

        assert_eq!(notifier.errors.load(Ordering::SeqCst), 0);
        sniffer.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_recovers_with_one_error_report() {
        // First session dies (stream closes), second survives. Exactly one
        // notify_error, the watch-list is re-fetched, streaming resumes.
        let feed = MockFeed::new(
            vec![instrument("a")],
            Vec::new(),
            vec![
                SessionScript {
                    messages: vec![Ok(FeedMessage::Candle(flat_candle("a", dec!(10), 1)))],
                    keep_open: false,
                },
                SessionScript {
                    messages: vec![Ok(FeedMessage::Candle(flat_candle("a", dec!(20), 2)))],
                    keep_open: true,
                },
            ],
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let (sniffer, handle) = spawn_sniffer(Arc::clone(&feed), Arc::clone(&notifier), test_settings());

        wait_until(|| notifier.starts.load(Ordering::SeqCst) == 2).await;

        assert_eq!(notifier.errors.load(Ordering::SeqCst), 1);
        assert_eq!(feed.watchlist_calls.load(Ordering::SeqCst), 2);
        assert_eq!(feed.streams_opened.load(Ordering::SeqCst), 2);

        sniffer.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stream_error_also_recovers() {
        let feed = MockFeed::new(
            vec![instrument("a")],
            Vec::new(),
            vec![
                SessionScript {
                    messages: vec![Err(FeedError::Transport("connection reset".into()))],
                    keep_open: true,
                },
                SessionScript { messages: Vec::new(), keep_open: true },
            ],
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let (sniffer, handle) = spawn_sniffer(Arc::clone(&feed), Arc::clone(&notifier), test_settings());

        wait_until(|| notifier.starts.load(Ordering::SeqCst) == 2).await;
        assert_eq!(notifier.errors.load(Ordering::SeqCst), 1);

        sniffer.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_run_does_not_open_a_second_subscription() {
        let feed = MockFeed::new(
            vec![instrument("a")],
            Vec::new(),
            vec![SessionScript { messages: Vec::new(), keep_open: true }],
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let (sniffer, handle) = spawn_sniffer(Arc::clone(&feed), Arc::clone(&notifier), test_settings());

        wait_until(|| notifier.starts.load(Ordering::SeqCst) == 1).await;

        // Second start while running: returns immediately, no new stream.
        sniffer.run().await.unwrap();
        assert_eq!(feed.streams_opened.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.starts.load(Ordering::SeqCst), 1);

        sniffer.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_bounded_on_a_silent_feed() {
        let feed = MockFeed::new(
            vec![instrument("a")],
            Vec::new(),
            vec![SessionScript { messages: Vec::new(), keep_open: true }],
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let (sniffer, handle) = spawn_sniffer(Arc::clone(&feed), Arc::clone(&notifier), test_settings());

        wait_until(|| notifier.starts.load(Ordering::SeqCst) == 1).await;

        // No messages ever arrive; the bounded stream read still lets the
        // loop observe the cleared flag.
        sniffer.stop();
        sniffer.stop();
        handle.await.unwrap().unwrap();
        assert!(!sniffer.is_running());
        assert!(sniffer.registry().is_none());
    }
}
