//! Discovery run coordination.
//!
//! One bounded execution per patch: extraction seeds the citation
//! backlog from the monitored pages, then N processor workers and M
//! feed workers drain it under a wall-clock budget. At most one run per
//! patch is live at a time; a second start request joins the existing
//! run. Cancellation is cooperative — workers finish their in-flight
//! item and exit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use patchwork_archive::{extract_citations, Extractor, Fetcher};
use patchwork_common::{MonitoredPage, Patch, RunStatus};
use patchwork_scorer::RelevanceScorer;
use patchwork_store::{Storage, StoreError};

use crate::agent::AgentService;
use crate::enrichment::EnrichmentDispatcher;
use crate::feed_worker::{FeedConfig, FeedWorker};
use crate::metrics::{MetricsSnapshot, RunMetrics};
use crate::processor::{Processor, ProcessorConfig};

/// Concurrent page extractions at run start.
const PAGE_EXTRACTION_CONCURRENCY: usize = 2;
/// How often live counters are flushed to the run row.
const METRICS_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StartRunError {
    #[error("patch not found: {0}")]
    PatchNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct RunTuning {
    pub processor_parallelism: usize,
    pub feed_parallelism: usize,
    pub run_deadline: Duration,
}

impl Default for RunTuning {
    fn default() -> Self {
        Self {
            processor_parallelism: 8,
            feed_parallelism: 4,
            run_deadline: Duration::from_secs(1_800),
        }
    }
}

/// External collaborators and pipeline stages, injected once.
pub struct Components {
    pub fetcher: Arc<Fetcher>,
    pub extractor: Arc<Extractor>,
    pub scorer: Arc<dyn RelevanceScorer>,
    pub agent: Arc<dyn AgentService>,
    pub dispatcher: Arc<dyn EnrichmentDispatcher>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTicket {
    pub run_id: Uuid,
    /// True when the request joined an already-active run.
    pub already_running: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub patch_id: Uuid,
    pub status: RunStatus,
    pub metrics: MetricsSnapshot,
}

struct ActiveRun {
    run_id: Uuid,
    metrics: Arc<RunMetrics>,
    cancel: watch::Sender<bool>,
}

pub struct Coordinator {
    storage: Storage,
    components: Components,
    processor_config: ProcessorConfig,
    feed_config: FeedConfig,
    tuning: RunTuning,
    active: Mutex<HashMap<Uuid, ActiveRun>>,
}

impl Coordinator {
    pub fn new(
        storage: Storage,
        components: Components,
        processor_config: ProcessorConfig,
        feed_config: FeedConfig,
        tuning: RunTuning,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            components,
            processor_config,
            feed_config,
            tuning,
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Start a discovery run for a patch, or join the active one.
    pub async fn start_run(self: Arc<Self>, patch_handle: &str) -> Result<RunTicket, StartRunError> {
        let patch = self
            .storage
            .patches()
            .by_handle(patch_handle)
            .await?
            .ok_or_else(|| StartRunError::PatchNotFound(patch_handle.to_string()))?;

        let mut active = self.active.lock().await;
        if let Some(run) = active.get(&patch.id) {
            info!(patch = %patch.handle, run_id = %run.run_id, "Run already active, joining");
            return Ok(RunTicket {
                run_id: run.run_id,
                already_running: true,
            });
        }

        let run = self.storage.runs().create(patch.id).await?;
        let metrics = Arc::new(RunMetrics::new());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        active.insert(
            patch.id,
            ActiveRun {
                run_id: run.id,
                metrics: metrics.clone(),
                cancel: cancel_tx,
            },
        );
        drop(active);

        info!(patch = %patch.handle, run_id = %run.id, "Discovery run starting");

        let coordinator = self.clone();
        let run_id = run.id;
        tokio::spawn(async move {
            coordinator.drive_run(patch, run_id, metrics, cancel_rx).await;
        });

        Ok(RunTicket {
            run_id,
            already_running: false,
        })
    }

    /// Live metrics for an active run, or the persisted row for a
    /// finished one.
    pub async fn run_report(&self, run_id: Uuid) -> Result<Option<RunReport>, StoreError> {
        {
            let active = self.active.lock().await;
            if let Some(run) = active.values().find(|r| r.run_id == run_id) {
                let Some(row) = self.storage.runs().get(run_id).await? else {
                    return Ok(None);
                };
                return Ok(Some(RunReport {
                    run_id,
                    patch_id: row.patch_id,
                    status: RunStatus::Running,
                    metrics: run.metrics.snapshot(),
                }));
            }
        }

        let Some(row) = self.storage.runs().get(run_id).await? else {
            return Ok(None);
        };
        Ok(Some(RunReport {
            run_id,
            patch_id: row.patch_id,
            status: row.status,
            metrics: MetricsSnapshot {
                processed: row.processed as u64,
                saved: row.saved as u64,
                denied: row.denied as u64,
                failed: row.failed as u64,
                rate: 0.0,
            },
        }))
    }

    /// Cooperatively cancel every active run (shutdown path).
    pub async fn cancel_all(&self) {
        let active = self.active.lock().await;
        for run in active.values() {
            let _ = run.cancel.send(true);
        }
    }

    async fn drive_run(
        &self,
        patch: Patch,
        run_id: Uuid,
        metrics: Arc<RunMetrics>,
        cancel_rx: watch::Receiver<bool>,
    ) {
        let status = match self
            .execute_run(&patch, run_id, &metrics, cancel_rx)
            .await
        {
            Ok(()) => {
                if metrics.fatal.load(Ordering::Relaxed) {
                    RunStatus::Failed
                } else {
                    RunStatus::Completed
                }
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Run aborted on database failure");
                RunStatus::Failed
            }
        };

        let snapshot = metrics.snapshot();
        if let Err(e) = self
            .storage
            .runs()
            .finish(
                run_id,
                status,
                snapshot.processed as i64,
                snapshot.saved as i64,
                snapshot.denied as i64,
                snapshot.failed as i64,
            )
            .await
        {
            error!(run_id = %run_id, error = %e, "Failed to finalize run row");
        }

        self.active.lock().await.remove(&patch.id);
        info!(run_id = %run_id, %status, "Discovery run finished: {snapshot}");
    }

    async fn execute_run(
        &self,
        patch: &Patch,
        run_id: Uuid,
        metrics: &Arc<RunMetrics>,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<(), StoreError> {
        // Phase 1: seed the backlog from the monitored pages.
        self.extract_pages(patch, &cancel_rx).await?;

        // Phase 2: drain it.
        let processor = Arc::new(Processor::new(
            self.storage.clone(),
            self.components.fetcher.clone(),
            self.components.extractor.clone(),
            self.components.scorer.clone(),
            self.components.dispatcher.clone(),
            self.processor_config.clone(),
        ));
        let feed_worker = Arc::new(FeedWorker::new(
            self.storage.clone(),
            self.components.agent.clone(),
            self.feed_config.clone(),
        ));

        let producers_done = Arc::new(AtomicBool::new(false));

        let processor_handles: Vec<_> = (0..self.tuning.processor_parallelism)
            .map(|_| {
                let processor = processor.clone();
                let patch = patch.clone();
                let metrics = metrics.clone();
                let cancel = cancel_rx.clone();
                tokio::spawn(async move {
                    processor.worker_loop(&patch, &metrics, cancel).await;
                })
            })
            .collect();

        let feed_handles: Vec<_> = (0..self.tuning.feed_parallelism)
            .map(|_| {
                let feed_worker = feed_worker.clone();
                let producers_done = producers_done.clone();
                let cancel = cancel_rx.clone();
                tokio::spawn(async move {
                    feed_worker.worker_loop(&producers_done, cancel).await;
                })
            })
            .collect();

        // Flush live counters while the workers run; enforce the
        // wall-clock budget.
        let mut processors = join_all(processor_handles);
        let deadline = tokio::time::sleep(self.tuning.run_deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut processors => break,
                _ = &mut deadline => {
                    warn!(run_id = %run_id, "Run deadline reached, cancelling");
                    {
                        let active = self.active.lock().await;
                        if let Some(run) = active.get(&patch.id) {
                            let _ = run.cancel.send(true);
                        }
                    }
                    processors.await;
                    break;
                }
                _ = tokio::time::sleep(METRICS_FLUSH_INTERVAL) => {
                    let s = metrics.snapshot();
                    if let Err(e) = self.storage.runs().update_counters(
                        run_id, s.processed as i64, s.saved as i64, s.denied as i64, s.failed as i64,
                    ).await {
                        warn!(run_id = %run_id, error = %e, "Metrics flush failed");
                    }
                }
            }
        }

        // Processors are done; let the feed workers drain the queue.
        producers_done.store(true, Ordering::Relaxed);
        join_all(feed_handles).await;

        Ok(())
    }

    /// Fetch each monitored page and store its citations. Fetch and
    /// parse failures skip the page; database failures abort the run.
    async fn extract_pages(
        &self,
        patch: &Patch,
        cancel_rx: &watch::Receiver<bool>,
    ) -> Result<(), StoreError> {
        let pages = self.storage.pages().for_patch(patch.id).await?;
        if pages.is_empty() {
            info!(patch = %patch.handle, "No monitored pages to extract");
            return Ok(());
        }
        info!(patch = %patch.handle, pages = pages.len(), "Extracting citations from monitored pages");

        let results: Vec<Result<(), StoreError>> = stream::iter(pages.into_iter().map(|page| {
            let fetcher = self.components.fetcher.clone();
            let citations = self.storage.citations();
            let cancel = cancel_rx.clone();
            async move { extract_one_page(&fetcher, &citations, &page, &cancel).await }
        }))
        .buffer_unordered(PAGE_EXTRACTION_CONCURRENCY)
        .collect()
        .await;

        for result in results {
            result?;
        }
        Ok(())
    }
}

async fn extract_one_page(
    fetcher: &Fetcher,
    citations: &patchwork_store::CitationStore,
    page: &MonitoredPage,
    cancel: &watch::Receiver<bool>,
) -> Result<(), StoreError> {
    if *cancel.borrow() {
        return Ok(());
    }

    let fetched = match fetcher.fetch(&page.wikipedia_url).await {
        Ok(f) => f,
        Err(e) => {
            warn!(url = %page.wikipedia_url, error = %e, "Page fetch failed, skipping");
            return Ok(());
        }
    };

    let html = String::from_utf8_lossy(&fetched.body);
    let candidates = extract_citations(&html, &page.wikipedia_url);
    let outcome = citations.extract_and_store(page.id, &candidates).await?;
    info!(
        page = %page.wikipedia_title,
        found = outcome.citations_found,
        stored = outcome.citations_stored,
        "Page citations extracted"
    );
    Ok(())
}
