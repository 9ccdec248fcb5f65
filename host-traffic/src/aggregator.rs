use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::table::HostTable;

/// Drives [`HostTable::tick`] every `interval` until `running` is cleared.
///
/// The first tick fires one full interval after start. Late ticks are
/// delayed rather than fired in a burst.
pub async fn run(table: Arc<HostTable>, interval: Duration, running: Arc<AtomicBool>) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !running.load(Ordering::Relaxed) {
            break;
        }
        let summary = table.tick();
        if summary.expired > 0 {
            info!(
                expired = summary.expired,
                active = summary.rotated,
                "expired idle hosts"
            );
        } else {
            debug!(active = summary.rotated, "rotated host rates");
        }
    }
}
