//! Background job: evict expired gate tokens from the live registry.
//!
//! The registry already sweeps opportunistically on every issue and
//! validate; this task bounds memory for idle periods with no gate traffic.

use std::time::Duration;

use tokio::time;

use crate::gate::TokenRegistry;

/// Spawn the background sweep task. Call this once at startup.
pub fn spawn(registry: TokenRegistry) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let evicted = registry.evict_expired();
            if evicted > 0 {
                tracing::info!(evicted, live = registry.len(), "swept expired gate tokens");
            }
        }
    });
}
