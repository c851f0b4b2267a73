//! The registry of running watchers, kept consistent with persisted sites.

use std::collections::HashMap;
use std::sync::Arc;

use pagewatch_core::{NewSite, Site, SiteChanges, SiteId, UserId, WatchPolicy, WatcherView};
use tokio::sync::Mutex;
use watch_logging::{watch_error, watch_info, watch_warn};

use crate::cycle::{probe, CycleContext, CycleError};
use crate::store::{SiteStore, StoreError};
use crate::watcher::Watcher;
use crate::Fetcher;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Pre-flight fetch+extract failed; nothing was persisted.
    #[error("site at {crawl_url} failed verification: {source}")]
    Verification {
        crawl_url: String,
        #[source]
        source: CycleError,
    },
    #[error("site {site_id} not found")]
    NotFound { site_id: SiteId },
    #[error("storage failed for {}: {source}", describe(.site_id))]
    Store {
        site_id: Option<SiteId>,
        #[source]
        source: StoreError,
    },
}

fn describe(site_id: &Option<SiteId>) -> String {
    site_id.map_or_else(|| "new site".to_string(), |id| format!("site {id}"))
}

impl PoolError {
    fn store(site_id: Option<SiteId>, source: StoreError) -> Self {
        match source {
            StoreError::SiteNotFound(id) => PoolError::NotFound { site_id: id },
            source => PoolError::Store {
                site_id,
                source,
            },
        }
    }
}

/// Owns one watcher per live site. All mutation goes through these methods,
/// serialized by a single lock over the id -> watcher map.
pub struct WatcherPool {
    ctx: CycleContext,
    policy: WatchPolicy,
    watchers: Mutex<HashMap<SiteId, Watcher>>,
}

impl WatcherPool {
    pub fn new(fetcher: Arc<dyn Fetcher>, store: Arc<dyn SiteStore>, policy: WatchPolicy) -> Self {
        Self::with_context(CycleContext::new(fetcher, store), policy)
    }

    pub fn with_context(ctx: CycleContext, policy: WatchPolicy) -> Self {
        Self {
            ctx,
            policy,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn SiteStore> {
        &self.ctx.store
    }

    pub fn policy(&self) -> WatchPolicy {
        self.policy
    }

    fn build(&self, site: Site) -> Watcher {
        Watcher::new(site, self.ctx.clone(), self.policy)
    }

    /// Builds an unstarted watcher for every persisted site (optionally one owner's).
    pub async fn load_all(&self, owner: Option<UserId>) -> Result<usize, PoolError> {
        let sites = self
            .ctx
            .store
            .list_sites(owner)
            .await
            .map_err(|err| PoolError::store(None, err))?;
        let mut watchers = self.watchers.lock().await;
        for site in &sites {
            let id = site.id;
            if let Some(mut previous) = watchers.insert(id, self.build(site.clone())) {
                previous.stop().await;
            }
            watch_info!("watcher.created site_id={} title={:?}", id, site.title);
        }
        watch_info!("pool.loaded watchers={} owner={:?}", sites.len(), owner);
        Ok(sites.len())
    }

    /// Starts every constructed watcher; each checks immediately.
    pub async fn start_all(&self) {
        let mut watchers = self.watchers.lock().await;
        for watcher in watchers.values_mut() {
            watcher.start();
        }
        watch_info!("pool.started watchers={}", watchers.len());
    }

    /// Verifies, persists and starts watching a new site.
    pub async fn add(&self, new: NewSite) -> Result<SiteId, PoolError> {
        probe(
            self.ctx.fetcher.as_ref(),
            &new.crawl_url,
            &new.selector,
            &new.url,
        )
        .await
        .map_err(|source| {
            watch_warn!(
                "site.rejected crawl_url={} selector={:?} error={}",
                new.crawl_url,
                new.selector,
                source
            );
            PoolError::Verification {
                crawl_url: new.crawl_url.clone(),
                source,
            }
        })?;

        let mut watchers = self.watchers.lock().await;
        let id = self
            .ctx
            .store
            .insert_site(new.clone())
            .await
            .map_err(|err| PoolError::store(None, err))?;
        let site = Site::from_new(id, new);

        let mut watcher = self.build(site.clone());
        watcher.start();
        if let Some(mut stale) = watchers.insert(id, watcher) {
            stale.stop().await;
        }
        watch_info!(
            "watcher.created site_id={} title={:?} url={}",
            id,
            site.title,
            site.url
        );
        Ok(id)
    }

    /// Deletes the site and evicts its watcher.
    pub async fn remove(&self, site_id: SiteId, delete_pages: bool) -> Result<(), PoolError> {
        let mut watchers = self.watchers.lock().await;
        // Retire first so no in-flight cycle can write after the delete.
        let previous = quiesce(&mut watchers, site_id).await;

        match self.ctx.store.delete_site(site_id, delete_pages).await {
            Ok(0) => Err(PoolError::NotFound { site_id }),
            Ok(_) => {
                watch_info!(
                    "watcher.deleted site_id={} delete_pages={}",
                    site_id,
                    delete_pages
                );
                Ok(())
            }
            Err(err) => {
                self.restore(&mut watchers, previous, &err).await;
                Err(PoolError::store(Some(site_id), err))
            }
        }
    }

    /// Persists `changes` and replaces the site's watcher with a fresh one.
    pub async fn update(&self, site_id: SiteId, changes: SiteChanges) -> Result<(), PoolError> {
        let mut watchers = self.watchers.lock().await;
        let previous = quiesce(&mut watchers, site_id).await;

        let written = match self.ctx.store.update_site(site_id, &changes).await {
            Ok(rows) => rows,
            Err(err) => {
                self.restore(&mut watchers, previous, &err).await;
                return Err(PoolError::store(Some(site_id), err));
            }
        };
        if written == 0 {
            return Err(PoolError::NotFound { site_id });
        }

        let site = match self.ctx.store.get_site(site_id).await {
            Ok(site) => site,
            Err(err) => {
                self.restore(&mut watchers, previous, &err).await;
                return Err(PoolError::store(Some(site_id), err));
            }
        };
        let mut watcher = self.build(site);
        watcher.start();
        watchers.insert(site_id, watcher);
        watch_info!(
            "watcher.replaced site_id={} changed={:?}",
            site_id,
            changes.field_names()
        );
        Ok(())
    }

    /// Requests an immediate cycle from a site's watcher.
    pub async fn check_now(&self, site_id: SiteId) -> Result<bool, PoolError> {
        let watchers = self.watchers.lock().await;
        let watcher = watchers
            .get(&site_id)
            .ok_or(PoolError::NotFound { site_id })?;
        Ok(watcher.check_now())
    }

    pub async fn status(&self, site_id: SiteId) -> Option<WatcherView> {
        self.watchers.lock().await.get(&site_id).map(Watcher::view)
    }

    /// Views of every watcher, ordered by site id.
    pub async fn statuses(&self) -> Vec<WatcherView> {
        let mut views: Vec<_> = self
            .watchers
            .lock()
            .await
            .values()
            .map(Watcher::view)
            .collect();
        views.sort_by_key(|view| view.site_id);
        views
    }

    pub async fn subscribe(
        &self,
        site_id: SiteId,
    ) -> Option<tokio::sync::watch::Receiver<WatcherView>> {
        self.watchers.lock().await.get(&site_id).map(Watcher::subscribe)
    }

    pub async fn contains(&self, site_id: SiteId) -> bool {
        self.watchers.lock().await.contains_key(&site_id)
    }

    pub async fn len(&self) -> usize {
        self.watchers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stops every watcher and empties the pool.
    pub async fn shutdown(&self) {
        let mut watchers = self.watchers.lock().await;
        let count = watchers.len();
        for (_, mut watcher) in watchers.drain() {
            watcher.stop().await;
        }
        watch_info!("pool.shutdown watchers={}", count);
    }

    /// Puts a fresh watcher back for a site whose storage write failed.
    ///
    /// Prefers the stored row, which carries any last-seen URL the retired
    /// watcher advanced; falls back to the configuration it was built from.
    async fn restore(
        &self,
        watchers: &mut HashMap<SiteId, Watcher>,
        previous: Option<Site>,
        cause: &StoreError,
    ) {
        let Some(previous) = previous else {
            return;
        };
        if cause.is_not_found() {
            return;
        }
        let id = previous.id;
        let site = self.ctx.store.get_site(id).await.unwrap_or(previous);
        let mut watcher = self.build(site);
        watcher.start();
        watchers.insert(id, watcher);
        watch_error!(
            "watcher.restored site_id={} reason=storage_failure error={}",
            id,
            cause
        );
    }
}

/// Evicts and retires a site's watcher, returning the configuration it ran with.
async fn quiesce(watchers: &mut HashMap<SiteId, Watcher>, site_id: SiteId) -> Option<Site> {
    let mut watcher = watchers.remove(&site_id)?;
    watcher.stop().await;
    Some(watcher.site().clone())
}
