//! Persistence gateway consumed by watchers and the pool.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use pagewatch_core::{
    NewPage, NewSite, Page, PageId, PageQuery, Site, SiteChanges, SiteId, UserId,
};
use serde::{Deserialize, Serialize};

use crate::persist::PersistError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("site {0} not found")]
    SiteNotFound(SiteId),
    #[error("page {0} not found")]
    PageNotFound(PageId),
    #[error("store file is corrupt: {0}")]
    Corrupt(String),
    #[error("failed to serialize store: {0}")]
    Serialize(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::SiteNotFound(_) | StoreError::PageNotFound(_))
    }
}

/// Durable storage for sites and pages.
///
/// Row-count results follow SQL semantics: `0` means no row matched.
#[async_trait]
pub trait SiteStore: Send + Sync {
    /// All sites, or only those of `owner`, ordered by id.
    async fn list_sites(&self, owner: Option<UserId>) -> Result<Vec<Site>, StoreError>;

    async fn get_site(&self, id: SiteId) -> Result<Site, StoreError>;

    async fn insert_site(&self, site: NewSite) -> Result<SiteId, StoreError>;

    async fn update_site(&self, id: SiteId, changes: &SiteChanges) -> Result<u64, StoreError>;

    /// Deletes the site, and its pages when `delete_pages` is set.
    async fn delete_site(&self, id: SiteId, delete_pages: bool) -> Result<u64, StoreError>;

    async fn insert_page(&self, page: NewPage) -> Result<PageId, StoreError>;

    async fn set_site_last_url(&self, id: SiteId, url: &str) -> Result<(), StoreError>;

    /// Inserts a discovered page and advances the site's last-seen URL.
    ///
    /// Stores that can do both atomically should override this.
    async fn record_page(&self, page: NewPage, last_url: &str) -> Result<PageId, StoreError> {
        let site_id = page.site_id;
        let page_id = self.insert_page(page).await?;
        self.set_site_last_url(site_id, last_url).await?;
        Ok(page_id)
    }

    /// Newest first.
    async fn list_pages(&self, query: &PageQuery) -> Result<Vec<Page>, StoreError>;

    async fn set_page_read(&self, id: PageId, read: bool) -> Result<(), StoreError>;

    async fn delete_page(&self, id: PageId) -> Result<(), StoreError>;
}

/// The site and page tables shared by the in-process stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tables {
    next_site_id: SiteId,
    next_page_id: PageId,
    sites: BTreeMap<SiteId, Site>,
    pages: BTreeMap<PageId, Page>,
}

impl Tables {
    pub fn sites(&self, owner: Option<UserId>) -> Vec<Site> {
        self.sites
            .values()
            .filter(|site| owner.map_or(true, |owner| site.owner == owner))
            .cloned()
            .collect()
    }

    pub fn site(&self, id: SiteId) -> Result<Site, StoreError> {
        self.sites.get(&id).cloned().ok_or(StoreError::SiteNotFound(id))
    }

    pub fn insert_site(&mut self, new: NewSite) -> SiteId {
        let id = allocate(&mut self.next_site_id, self.sites.keys().next_back());
        self.sites.insert(id, Site::from_new(id, new));
        id
    }

    pub fn update_site(&mut self, id: SiteId, changes: &SiteChanges) -> u64 {
        match self.sites.get_mut(&id) {
            Some(site) => {
                site.apply(changes);
                1
            }
            None => 0,
        }
    }

    pub fn delete_site(&mut self, id: SiteId, delete_pages: bool) -> u64 {
        if self.sites.remove(&id).is_none() {
            return 0;
        }
        if delete_pages {
            self.pages.retain(|_, page| page.site_id != id);
        }
        1
    }

    pub fn insert_page(&mut self, new: NewPage) -> Result<PageId, StoreError> {
        if !self.sites.contains_key(&new.site_id) {
            return Err(StoreError::SiteNotFound(new.site_id));
        }
        let id = allocate(&mut self.next_page_id, self.pages.keys().next_back());
        self.pages.insert(id, Page::from_new(id, new));
        Ok(id)
    }

    pub fn set_site_last_url(&mut self, id: SiteId, url: &str) -> Result<(), StoreError> {
        let site = self.sites.get_mut(&id).ok_or(StoreError::SiteNotFound(id))?;
        site.last_url = url.to_string();
        Ok(())
    }

    /// Both writes or neither.
    pub fn record_page(&mut self, new: NewPage, last_url: &str) -> Result<PageId, StoreError> {
        let site_id = new.site_id;
        let page_id = self.insert_page(new)?;
        self.set_site_last_url(site_id, last_url)?;
        Ok(page_id)
    }

    pub fn pages(&self, query: &PageQuery) -> Vec<Page> {
        let mut pages: Vec<Page> = self
            .pages
            .values()
            .filter(|page| query.matches(page))
            .cloned()
            .collect();
        pages.sort_by(|a, b| {
            b.discovered_at
                .cmp(&a.discovered_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        pages
    }

    pub fn set_page_read(&mut self, id: PageId, read: bool) -> Result<(), StoreError> {
        let page = self.pages.get_mut(&id).ok_or(StoreError::PageNotFound(id))?;
        page.is_read = read;
        Ok(())
    }

    pub fn delete_page(&mut self, id: PageId) -> Result<(), StoreError> {
        self.pages
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::PageNotFound(id))
    }
}

/// Ids start at 1 and never go backwards, even if the counter was lost.
fn allocate(next: &mut u64, highest: Option<&u64>) -> u64 {
    let id = (*next).max(highest.map_or(0, |h| h + 1)).max(1);
    *next = id + 1;
    id
}

/// Non-durable store; every operation is atomic under one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tables(tables: Tables) -> Self {
        Self {
            tables: Mutex::new(tables),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }
}

#[async_trait]
impl SiteStore for MemoryStore {
    async fn list_sites(&self, owner: Option<UserId>) -> Result<Vec<Site>, StoreError> {
        Ok(self.lock()?.sites(owner))
    }

    async fn get_site(&self, id: SiteId) -> Result<Site, StoreError> {
        self.lock()?.site(id)
    }

    async fn insert_site(&self, site: NewSite) -> Result<SiteId, StoreError> {
        Ok(self.lock()?.insert_site(site))
    }

    async fn update_site(&self, id: SiteId, changes: &SiteChanges) -> Result<u64, StoreError> {
        Ok(self.lock()?.update_site(id, changes))
    }

    async fn delete_site(&self, id: SiteId, delete_pages: bool) -> Result<u64, StoreError> {
        Ok(self.lock()?.delete_site(id, delete_pages))
    }

    async fn insert_page(&self, page: NewPage) -> Result<PageId, StoreError> {
        self.lock()?.insert_page(page)
    }

    async fn set_site_last_url(&self, id: SiteId, url: &str) -> Result<(), StoreError> {
        self.lock()?.set_site_last_url(id, url)
    }

    async fn record_page(&self, page: NewPage, last_url: &str) -> Result<PageId, StoreError> {
        self.lock()?.record_page(page, last_url)
    }

    async fn list_pages(&self, query: &PageQuery) -> Result<Vec<Page>, StoreError> {
        Ok(self.lock()?.pages(query))
    }

    async fn set_page_read(&self, id: PageId, read: bool) -> Result<(), StoreError> {
        self.lock()?.set_page_read(id, read)
    }

    async fn delete_page(&self, id: PageId) -> Result<(), StoreError> {
        self.lock()?.delete_page(id)
    }
}
