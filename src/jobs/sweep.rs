//! Background job: evict expired entries from the in-memory state backend.
//!
//! Expired entries are already invisible to readers; the sweep only returns
//! their memory. Runs for the lifetime of the process.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

use crate::state::MemoryBackend;

/// Spawn the sweep task. Call this once at startup.
pub fn spawn(memory: MemoryBackend, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sweep_once(&memory);
        }
    })
}

fn sweep_once(memory: &MemoryBackend) -> usize {
    let evicted = memory.evict_expired();
    if evicted > 0 {
        tracing::debug!(evicted, remaining = memory.len(), "swept expired state entries");
    }
    evicted
}
