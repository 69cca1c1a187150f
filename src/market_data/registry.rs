// =============================================================================
// Instrument Registry — watch-list instruments and their rolling statistics
// =============================================================================
//
// Built once per session from the watch-list; the key set never changes for
// the lifetime of a session. Statistics are mutated in place by the ingestion
// path and read concurrently by the volume monitor, so every instrument gets
// its own lock — one global lock would serialise unrelated instruments.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::settings::SnifferSettings;
use crate::types::{Candle, Instrument};

use super::rolling_stats::RollingStatistics;

/// Lookup failure for an instrument id absent from the watch-list.
///
/// A well-formed feed never produces this; the caller logs it and drops the
/// message instead of tearing down the session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("instrument {0} is not in the watch-list")]
    NotFound(String),
}

/// One watch-list instrument together with its statistics.
#[derive(Debug)]
pub struct InstrumentEntry {
    pub instrument: Instrument,
    pub stats: RwLock<RollingStatistics>,
}

/// Mapping from instrument uid to its entry.
pub struct InstrumentRegistry {
    entries: HashMap<String, InstrumentEntry>,
}

impl InstrumentRegistry {
    /// Build a registry with one empty accumulator per instrument.
    pub fn new(instruments: Vec<Instrument>, settings: &SnifferSettings) -> Self {
        let entries = instruments
            .into_iter()
            .map(|instrument| {
                (
                    instrument.uid.clone(),
                    InstrumentEntry {
                        instrument,
                        stats: RwLock::new(RollingStatistics::new(
                            settings.last_candles_count,
                            settings.last_trades_count,
                        )),
                    },
                )
            })
            .collect();

        Self { entries }
    }

    /// Look up an instrument by uid.
    pub fn get(&self, uid: &str) -> Result<&InstrumentEntry, RegistryError> {
        self.entries
            .get(uid)
            .ok_or_else(|| RegistryError::NotFound(uid.to_string()))
    }

    /// Feed historical candles into an instrument's windows, oldest first.
    ///
    /// Seeding order matters: feeding newest-first would invert the FIFO
    /// eviction order and corrupt the rolling mean once the window fills.
    pub fn seed_candles(&self, uid: &str, mut candles: Vec<Candle>) -> Result<(), RegistryError> {
        let entry = self.get(uid)?;

        candles.sort_by_key(|c| c.time);

        let mut stats = entry.stats.write();
        for candle in candles {
            stats.observe_candle(candle);
        }

        debug!(
            uid = %uid,
            candles = stats.candle_count(),
            "historical candles seeded"
        );
        Ok(())
    }

    /// Iterate over all entries.
    pub fn entries(&self) -> impl Iterator<Item = &InstrumentEntry> {
        self.entries.values()
    }

    /// All instruments on the watch-list.
    pub fn instruments(&self) -> Vec<Instrument> {
        self.entries.values().map(|e| e.instrument.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn instrument(uid: &str) -> Instrument {
        Instrument {
            uid: uid.into(),
            name: format!("Test {uid}"),
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

    #[test]
    fn get_known_and_unknown_uid() {
        let registry =
            InstrumentRegistry::new(vec![instrument("a"), instrument("b")], &SnifferSettings::default());
        assert_eq!(registry.len(), 2);
        assert!(registry.get("a").is_ok());
        assert_eq!(
            registry.get("zzz").unwrap_err(),
            RegistryError::NotFound("zzz".into())
        );
    }

    #[test]
    fn seeding_pre_warms_rolling_mean() {
        let registry = InstrumentRegistry::new(vec![instrument("a")], &SnifferSettings::default());
        let candles = (1..=5)
            .map(|i| flat_candle("a", Decimal::from(i * 10), i as i64))
            .collect();
        registry.seed_candles("a", candles).unwrap();

        let entry = registry.get("a").unwrap();
        assert_eq!(entry.stats.read().rolling_candle_mean(), Some(dec!(30)));
    }

    #[test]
    fn seeding_sorts_oldest_first() {
        // Window of 5; hand candles over newest-first. If seeding did not
        // sort, eviction would drop the newest values instead of the oldest.
        let registry = InstrumentRegistry::new(vec![instrument("a")], &SnifferSettings::default());
        let candles = (1..=6)
            .rev()
            .map(|i| flat_candle("a", Decimal::from(i * 10), i as i64))
            .collect();
        registry.seed_candles("a", candles).unwrap();

        let entry = registry.get("a").unwrap();
        let stats = entry.stats.read();
        assert_eq!(stats.candle_count(), 5);
        // Candle 10 evicted: mean(20,30,40,50,60) = 40.
        assert_eq!(stats.rolling_candle_mean(), Some(dec!(40)));
        assert_eq!(stats.latest_candle().unwrap().close, dec!(60));
    }

    #[test]
    fn seeding_unknown_uid_fails() {
        let registry = InstrumentRegistry::new(vec![instrument("a")], &SnifferSettings::default());
        assert!(registry.seed_candles("nope", Vec::new()).is_err());
    }
}
