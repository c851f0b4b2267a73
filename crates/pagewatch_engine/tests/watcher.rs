mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{
    article, fast_policy, listing, new_site, wait_for_view, Reply, ScriptedFetcher, CRAWL,
};
use pagewatch_core::{
    NewPage, NewSite, Page, PageId, PageQuery, Site, SiteChanges, SiteId, UserId, WatchPolicy,
    WatcherStatus,
};
use pagewatch_engine::{
    CycleContext, FailureKind, FetchError, FetchOutput, Fetcher, MemoryStore, SiteStore,
    StoreError, Watcher,
};
use pretty_assertions::assert_eq;
use tokio::sync::Notify;

fn slow_policy() -> WatchPolicy {
    WatchPolicy {
        interval: Duration::from_secs(3600),
        disable_threshold: 10,
    }
}

async fn stored_site(store: &MemoryStore, last_url: &str) -> Site {
    let id = store.insert_site(new_site("a.item")).await.unwrap();
    if !last_url.is_empty() {
        store.set_site_last_url(id, last_url).await.unwrap();
    }
    store.get_site(id).await.unwrap()
}

#[tokio::test]
async fn ten_consecutive_failures_disable_the_watcher() {
    common::init_logging();
    let fetcher = ScriptedFetcher::new();
    fetcher.fail(CRAWL);
    let store = Arc::new(MemoryStore::new());
    let site = stored_site(&store, "").await;

    let mut watcher = Watcher::new(site, CycleContext::new(fetcher.clone(), store), fast_policy());
    let mut rx = watcher.subscribe();
    watcher.start();

    let view = wait_for_view(&mut rx, |v| v.status == WatcherStatus::Disabled).await;
    assert_eq!(view.consecutive_failures, 10);
    assert!(!view.timer_armed);
    assert_eq!(fetcher.calls(CRAWL), 10);

    // Many intervals later nothing else has been fetched.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fetcher.calls(CRAWL), 10);
    assert_eq!(watcher.view().status, WatcherStatus::Disabled);
}

#[tokio::test]
async fn success_resets_failures_and_unchanged_inserts_nothing() {
    let fetcher = ScriptedFetcher::new();
    fetcher.script(
        CRAWL,
        vec![
            Reply::Fail(FailureKind::Network),
            Reply::Fail(FailureKind::HttpStatus(503)),
        ],
    );
    fetcher.page(CRAWL, &listing("/posts/1"));
    let store = Arc::new(MemoryStore::new());
    let site = stored_site(&store, "https://news.example/posts/1").await;

    let mut watcher = Watcher::new(site, CycleContext::new(fetcher.clone(), store.clone()), fast_policy());
    let mut rx = watcher.subscribe();
    watcher.start();

    let view = wait_for_view(&mut rx, |v| v.cycles_completed >= 4).await;
    assert_eq!(view.consecutive_failures, 0);
    assert!(fetcher.calls(CRAWL) >= 4);
    assert_ne!(view.status, WatcherStatus::Disabled);

    assert!(store.list_pages(&PageQuery::default()).await.unwrap().is_empty());
    assert_eq!(fetcher.calls("https://news.example/posts/1"), 0);
    watcher.stop().await;
}

#[tokio::test]
async fn check_now_runs_a_cycle_before_the_interval() {
    let fetcher = ScriptedFetcher::new();
    fetcher.page(CRAWL, &listing("/posts/1"));
    fetcher.page("https://news.example/posts/1", &article("One"));
    fetcher.page("https://news.example/posts/2", &article("Two"));
    let store = Arc::new(MemoryStore::new());
    let site = stored_site(&store, "").await;

    let mut watcher = Watcher::new(site, CycleContext::new(fetcher.clone(), store.clone()), slow_policy());
    let mut rx = watcher.subscribe();
    assert!(!watcher.check_now());
    watcher.start();

    let view = wait_for_view(&mut rx, |v| {
        v.cycles_completed == 1 && v.status == WatcherStatus::Idle
    })
    .await;
    assert!(view.timer_armed);

    fetcher.page(CRAWL, &listing("/posts/2"));
    assert!(watcher.check_now());
    wait_for_view(&mut rx, |v| {
        v.cycles_completed == 2 && v.status == WatcherStatus::Idle
    })
    .await;

    let titles: Vec<_> = store
        .list_pages(&PageQuery::default())
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.title)
        .collect();
    assert_eq!(titles.len(), 2);
    assert!(titles.contains(&"One".to_string()));
    assert!(titles.contains(&"Two".to_string()));
    assert_eq!(fetcher.calls(CRAWL), 2);
    watcher.stop().await;
}

#[tokio::test]
async fn watcher_remembers_what_it_ingested() {
    let fetcher = ScriptedFetcher::new();
    fetcher.page(CRAWL, &listing("/posts/1"));
    fetcher.page("https://news.example/posts/1", &article("One"));
    let store = Arc::new(MemoryStore::new());
    let site = stored_site(&store, "").await;

    let mut watcher = Watcher::new(site, CycleContext::new(fetcher.clone(), store.clone()), fast_policy());
    let mut rx = watcher.subscribe();
    watcher.start();

    wait_for_view(&mut rx, |v| v.cycles_completed >= 3).await;
    watcher.stop().await;

    assert_eq!(store.list_pages(&PageQuery::default()).await.unwrap().len(), 1);
    assert_eq!(fetcher.calls("https://news.example/posts/1"), 1);
}

#[tokio::test]
async fn stop_publishes_stopped_and_rejects_commands() {
    let fetcher = ScriptedFetcher::new();
    fetcher.page(CRAWL, &listing("/posts/1"));
    fetcher.page("https://news.example/posts/1", &article("One"));
    let store = Arc::new(MemoryStore::new());
    let site = stored_site(&store, "").await;

    let mut watcher = Watcher::new(site, CycleContext::new(fetcher, store), slow_policy());
    let mut rx = watcher.subscribe();
    watcher.start();
    wait_for_view(&mut rx, |v| v.cycles_completed == 1).await;

    watcher.stop().await;
    assert!(!watcher.is_started());
    assert!(!watcher.check_now());
    let view = wait_for_view(&mut rx, |v| v.status == WatcherStatus::Stopped).await;
    assert!(!view.timer_armed);
}

/// Blocks fetches of one URL until released.
struct HeldFetcher {
    inner: Arc<ScriptedFetcher>,
    held_url: String,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl Fetcher for HeldFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchOutput, FetchError> {
        if url == self.held_url {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.fetch(url).await
    }
}

#[tokio::test]
async fn cycle_finishing_after_stop_never_writes() {
    common::init_logging();
    let inner = ScriptedFetcher::new();
    inner.page(CRAWL, &listing("/posts/1"));
    inner.page("https://news.example/posts/1", &article("One"));
    let fetcher = Arc::new(HeldFetcher {
        inner: inner.clone(),
        held_url: "https://news.example/posts/1".to_string(),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let store = Arc::new(MemoryStore::new());
    let site = stored_site(&store, "").await;
    let site_id = site.id;

    let mut watcher = Watcher::new(site, CycleContext::new(fetcher.clone(), store.clone()), slow_policy());
    watcher.start();

    tokio::time::timeout(common::WAIT, fetcher.entered.notified())
        .await
        .unwrap();
    watcher.stop().await;
    fetcher.release.notify_one();

    common::eventually(|| {
        let inner = inner.clone();
        async move { inner.calls("https://news.example/posts/1") == 1 }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(store.list_pages(&PageQuery::default()).await.unwrap().is_empty());
    assert_eq!(store.get_site(site_id).await.unwrap().last_url, "");
}

/// Memory store whose page writes block until released.
struct SlowStore {
    inner: MemoryStore,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl SiteStore for SlowStore {
    async fn list_sites(&self, owner: Option<UserId>) -> Result<Vec<Site>, StoreError> {
        self.inner.list_sites(owner).await
    }
    async fn get_site(&self, id: SiteId) -> Result<Site, StoreError> {
        self.inner.get_site(id).await
    }
    async fn insert_site(&self, site: NewSite) -> Result<SiteId, StoreError> {
        self.inner.insert_site(site).await
    }
    async fn update_site(&self, id: SiteId, changes: &SiteChanges) -> Result<u64, StoreError> {
        self.inner.update_site(id, changes).await
    }
    async fn delete_site(&self, id: SiteId, delete_pages: bool) -> Result<u64, StoreError> {
        self.inner.delete_site(id, delete_pages).await
    }
    async fn insert_page(&self, page: NewPage) -> Result<PageId, StoreError> {
        self.inner.insert_page(page).await
    }
    async fn set_site_last_url(&self, id: SiteId, url: &str) -> Result<(), StoreError> {
        self.inner.set_site_last_url(id, url).await
    }
    async fn record_page(&self, page: NewPage, last_url: &str) -> Result<PageId, StoreError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.record_page(page, last_url).await
    }
    async fn list_pages(&self, query: &PageQuery) -> Result<Vec<Page>, StoreError> {
        self.inner.list_pages(query).await
    }
    async fn set_page_read(&self, id: PageId, read: bool) -> Result<(), StoreError> {
        self.inner.set_page_read(id, read).await
    }
    async fn delete_page(&self, id: PageId) -> Result<(), StoreError> {
        self.inner.delete_page(id).await
    }
}

#[tokio::test]
async fn dropped_watcher_stops_after_a_write_in_progress() {
    common::init_logging();
    let fetcher = ScriptedFetcher::new();
    fetcher.page(CRAWL, &listing("/posts/1"));
    fetcher.page("https://news.example/posts/1", &article("One"));
    let store = Arc::new(SlowStore {
        inner: MemoryStore::new(),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let site = stored_site(&store.inner, "").await;

    let mut watcher = Watcher::new(site, CycleContext::new(fetcher, store.clone()), slow_policy());
    let mut rx = watcher.subscribe();
    watcher.start();

    tokio::time::timeout(common::WAIT, store.entered.notified())
        .await
        .unwrap();
    drop(watcher);
    store.release.notify_one();

    let view = wait_for_view(&mut rx, |v| v.status == WatcherStatus::Stopped).await;
    assert!(!view.timer_armed);
    // The write was admitted before the drop, so it completes.
    assert_eq!(
        store.inner.list_pages(&PageQuery::default()).await.unwrap().len(),
        1
    );
}
