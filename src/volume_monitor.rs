// =============================================================================
// Volume Monitor — periodic per-second volume ranking
// =============================================================================
//
// Runs as a background Tokio task alongside the streaming loop, waking every
// tick to read `mean_volume_per_second` from every instrument, keep the
// positive ones, and report them ranked. A pure reader: a tick may observe
// some instruments updated since the last tick and some not, which is fine
// because the output is advisory.
//
// Spawned once per session:
//
//   tokio::spawn(run_volume_monitor(
//       Arc::clone(&registry),
//       Arc::clone(&running),
//       Arc::clone(&session_done),
//       settings.volume_monitor_interval(),
//   ));
//
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info};

use crate::market_data::InstrumentRegistry;

/// Read every instrument's mean volume per second, keep positive values,
/// and sort descending. Returns (display name, volume) pairs.
pub fn ranked_volume_per_second(registry: &InstrumentRegistry) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = registry
        .entries()
        .filter_map(|entry| {
            let vps = entry.stats.read().mean_volume_per_second();
            (vps > 0.0).then(|| (entry.instrument.name.clone(), vps))
        })
        .collect();

    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

/// Run the volume monitor loop until the sniffer stops or its session ends.
pub async fn run_volume_monitor(
    registry: Arc<InstrumentRegistry>,
    running: Arc<AtomicBool>,
    session_done: Arc<AtomicBool>,
    tick: Duration,
) {
    info!(interval_ms = tick.as_millis() as u64, "volume monitor started");

    let mut ticker = interval(tick);

    loop {
        ticker.tick().await;

        if !running.load(Ordering::SeqCst) || session_done.load(Ordering::SeqCst) {
            break;
        }

        let ranked = ranked_volume_per_second(&registry);
        if ranked.is_empty() {
            continue;
        }

        for (name, vps) in &ranked {
            debug!(instrument = %name, volume_per_second = vps, "volume per second");
        }
    }

    info!("volume monitor stopped");
}
