// Hero-image enrichment: trait boundary + fire-and-forget dispatch.
//
// The processor hands saved content ids to an EnrichmentDispatcher and
// never waits. Production wires in an HTTP dispatcher with a bounded
// task pool; a saturated pool drops the dispatch with a warning rather
// than blocking the processor. Tests use MockDispatcher.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use uuid::Uuid;

/// Trait boundary for dispatching enrichment work.
pub trait EnrichmentDispatcher: Send + Sync {
    /// Submit `content_id` for hero enrichment. Must not block and must
    /// not surface failures to the caller.
    fn dispatch(&self, content_id: Uuid);
}

// ---------------------------------------------------------------------------
// HttpDispatcher (production)
// ---------------------------------------------------------------------------

/// POSTs enrichment requests from a bounded spawn pool. Retries are the
/// enrichment service's concern; failures here are logged and dropped.
pub struct HttpDispatcher {
    http: reqwest::Client,
    endpoint: String,
    permits: Arc<tokio::sync::Semaphore>,
}

impl HttpDispatcher {
    pub fn new(endpoint: impl Into<String>, max_in_flight: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            permits: Arc::new(tokio::sync::Semaphore::new(max_in_flight)),
        }
    }
}

impl EnrichmentDispatcher for HttpDispatcher {
    fn dispatch(&self, content_id: Uuid) {
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            warn!(%content_id, "Enrichment pool saturated, dropping dispatch");
            return;
        };

        let http = self.http.clone();
        let url = format!("{}/enrich/{content_id}", self.endpoint.trim_end_matches('/'));
        tokio::spawn(async move {
            let _permit = permit;
            match http.post(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(%content_id, "Enrichment dispatched");
                }
                Ok(resp) => {
                    warn!(%content_id, status = %resp.status(), "Enrichment dispatch rejected");
                }
                Err(e) => {
                    warn!(%content_id, error = %e, "Enrichment dispatch failed");
                }
            }
        });
    }
}

// ---------------------------------------------------------------------------
// NoopDispatcher — enrichment endpoint not configured
// ---------------------------------------------------------------------------

pub struct NoopDispatcher;

impl EnrichmentDispatcher for NoopDispatcher {
    fn dispatch(&self, content_id: Uuid) {
        debug!(%content_id, "Enrichment disabled, skipping dispatch");
    }
}

// ---------------------------------------------------------------------------
// MockDispatcher (for tests)
// ---------------------------------------------------------------------------

/// Records `dispatch()` calls for test assertions.
pub struct MockDispatcher {
    calls: Mutex<Vec<Uuid>>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Uuid> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EnrichmentDispatcher for MockDispatcher {
    fn dispatch(&self, content_id: Uuid) {
        self.calls.lock().unwrap().push(content_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_records_dispatches() {
        let mock = MockDispatcher::new();
        let id = Uuid::new_v4();
        mock.dispatch(id);
        assert_eq!(mock.calls(), vec![id]);
    }

    #[tokio::test]
    async fn saturated_pool_drops_instead_of_blocking() {
        // Zero permits: every dispatch is dropped immediately.
        let dispatcher = HttpDispatcher::new("http://127.0.0.1:9", 0);
        let start = std::time::Instant::now();
        for _ in 0..100 {
            dispatcher.dispatch(Uuid::new_v4());
        }
        assert!(start.elapsed() < std::time::Duration::from_millis(100));
    }
}
