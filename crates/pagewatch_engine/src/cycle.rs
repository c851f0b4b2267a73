//! One poll cycle: fetch the crawl page, detect the newest item, ingest it if new.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pagewatch_core::{CycleResult, NewPage, PageId, Site};
use tokio::sync::{Mutex, MutexGuard};
use watch_logging::{watch_debug, watch_info};

use crate::extract::{extract_metadata, find_candidate_url, ExtractError};
use crate::store::{SiteStore, StoreError};
use crate::{FetchError, Fetcher};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Collaborators shared by every cycle of every watcher in a pool.
#[derive(Clone)]
pub struct CycleContext {
    pub fetcher: Arc<dyn Fetcher>,
    pub store: Arc<dyn SiteStore>,
    /// Source of page discovery timestamps.
    pub clock: Clock,
}

impl CycleContext {
    pub fn new(fetcher: Arc<dyn Fetcher>, store: Arc<dyn SiteStore>) -> Self {
        Self {
            fetcher,
            store,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The candidate equals the stored last-seen URL.
    Unchanged { candidate: String },
    /// A page was stored and the last-seen URL advanced to `candidate`.
    Ingested { page_id: PageId, candidate: String },
    /// New content was found but the watcher was retired before the write.
    Discarded { candidate: String },
}

impl CycleOutcome {
    pub fn result(&self) -> CycleResult {
        match self {
            CycleOutcome::Unchanged { .. } => CycleResult::NoNewContent,
            CycleOutcome::Ingested { .. } | CycleOutcome::Discarded { .. } => CycleResult::NewPage,
        }
    }
}

/// Admits persistence writes until the owning watcher is retired.
///
/// Retiring waits for a write already in progress; afterwards no write is admitted.
#[derive(Debug, Clone, Default)]
pub struct WriteGate {
    retired: Arc<Mutex<bool>>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn retire(&self) {
        *self.retired.lock().await = true;
    }

    pub async fn is_retired(&self) -> bool {
        *self.retired.lock().await
    }

    /// Holds the gate open for one write, or `None` once retired.
    async fn admit(&self) -> Option<MutexGuard<'_, bool>> {
        let guard = self.retired.lock().await;
        (!*guard).then_some(guard)
    }
}

/// Fetches `crawl_url` and resolves the first `selector` match to an absolute URL.
pub async fn probe(
    fetcher: &dyn Fetcher,
    crawl_url: &str,
    selector: &str,
    base_url: &str,
) -> Result<String, CycleError> {
    let document = fetcher.fetch_document(crawl_url).await?;
    Ok(find_candidate_url(&document.html, selector, base_url)?)
}

pub async fn run_cycle(
    ctx: &CycleContext,
    site: &Site,
    gate: &WriteGate,
) -> Result<CycleOutcome, CycleError> {
    let candidate = probe(ctx.fetcher.as_ref(), &site.crawl_url, &site.selector, &site.url).await?;
    if candidate == site.last_url {
        watch_debug!("cycle.unchanged site_id={} url={}", site.id, candidate);
        return Ok(CycleOutcome::Unchanged { candidate });
    }

    let document = ctx.fetcher.fetch_document(&candidate).await?;
    let metadata = extract_metadata(&document.html, &candidate);
    let page = NewPage {
        site_id: site.id,
        owner: site.owner,
        title: metadata.title,
        url: metadata.url,
        thumbnail_url: metadata.thumbnail_url,
        description: metadata.description,
        discovered_at: (ctx.clock)(),
    };

    let Some(_open) = gate.admit().await else {
        watch_info!(
            "cycle.discarded site_id={} url={} reason=watcher_retired",
            site.id,
            candidate
        );
        return Ok(CycleOutcome::Discarded { candidate });
    };
    let title = page.title.clone();
    let page_id = ctx.store.record_page(page, &candidate).await?;
    watch_info!(
        "page.ingested site_id={} page_id={} url={} title={:?}",
        site.id,
        page_id,
        candidate,
        title
    );
    Ok(CycleOutcome::Ingested { page_id, candidate })
}
