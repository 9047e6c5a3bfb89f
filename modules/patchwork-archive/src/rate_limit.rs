//! Per-host politeness gate.
//!
//! Process-wide minimum spacing between requests to the same registrable
//! domain. Callers reserve a slot under the lock, then sleep outside it,
//! so the gate never serializes unrelated hosts.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct HostGate {
    min_spacing: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HostGate {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until this host's next request slot. Each caller gets a
    /// distinct slot spaced `min_spacing` apart, in arrival order.
    pub async fn acquire(&self, registrable_domain: &str) {
        let slot = {
            let mut map = self.next_slot.lock().await;
            let now = Instant::now();
            let entry = map.entry(registrable_domain.to_string()).or_insert(now);
            let slot = (*entry).max(now);
            *entry = slot + self.min_spacing;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}
