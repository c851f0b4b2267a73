use std::fs;

use chrono::{Duration, TimeZone, Utc};
use pagewatch_core::{NewPage, NewSite, PageQuery, SiteChanges};
use pagewatch_engine::{MemoryStore, RonFileStore, SiteStore, StoreError};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn new_site(owner: u64, title: &str) -> NewSite {
    NewSite {
        title: title.to_string(),
        url: "https://a.example".to_string(),
        crawl_url: "https://a.example/list".to_string(),
        selector: "a".to_string(),
        owner,
    }
}

fn new_page(site_id: u64, url: &str, minutes: i64) -> NewPage {
    NewPage {
        site_id,
        owner: 1,
        title: format!("page {url}"),
        url: url.to_string(),
        thumbnail_url: String::new(),
        description: String::new(),
        discovered_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
            + Duration::minutes(minutes),
    }
}

#[tokio::test]
async fn sites_get_increasing_ids_and_filter_by_owner() {
    let store = MemoryStore::new();
    let a = store.insert_site(new_site(1, "a")).await.unwrap();
    let b = store.insert_site(new_site(2, "b")).await.unwrap();
    assert_eq!((a, b), (1, 2));

    let all = store.list_sites(None).await.unwrap();
    assert_eq!(all.len(), 2);
    let mine = store.list_sites(Some(2)).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].title, "b");
    assert_eq!(mine[0].last_url, "");
}

#[tokio::test]
async fn update_and_delete_report_affected_rows() {
    let store = MemoryStore::new();
    let id = store.insert_site(new_site(1, "a")).await.unwrap();
    let changes = SiteChanges {
        crawl_url: Some("https://a.example/new-list".to_string()),
        ..SiteChanges::default()
    };

    assert_eq!(store.update_site(id, &changes).await.unwrap(), 1);
    assert_eq!(store.update_site(99, &changes).await.unwrap(), 0);
    assert_eq!(
        store.get_site(id).await.unwrap().crawl_url,
        "https://a.example/new-list"
    );

    assert_eq!(store.delete_site(99, false).await.unwrap(), 0);
    assert_eq!(store.delete_site(id, false).await.unwrap(), 1);
    assert!(matches!(
        store.get_site(id).await,
        Err(StoreError::SiteNotFound(1))
    ));
}

#[tokio::test]
async fn record_page_advances_last_url_together_with_the_insert() {
    let store = MemoryStore::new();
    let id = store.insert_site(new_site(1, "a")).await.unwrap();

    let page_id = store
        .record_page(new_page(id, "https://a.example/1", 0), "https://a.example/1")
        .await
        .unwrap();
    assert_eq!(page_id, 1);
    assert_eq!(store.get_site(id).await.unwrap().last_url, "https://a.example/1");

    let pages = store.list_pages(&PageQuery::default()).await.unwrap();
    assert_eq!(pages.len(), 1);
    assert!(!pages[0].is_read);
}

#[tokio::test]
async fn pages_for_missing_sites_are_rejected() {
    let store = MemoryStore::new();
    let err = store
        .record_page(new_page(5, "https://a.example/1", 0), "https://a.example/1")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::SiteNotFound(5)));
    assert!(store.list_pages(&PageQuery::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn pages_list_newest_first_and_toggle_read_state() {
    let store = MemoryStore::new();
    let id = store.insert_site(new_site(1, "a")).await.unwrap();
    let older = store.insert_page(new_page(id, "https://a.example/1", 0)).await.unwrap();
    let newer = store.insert_page(new_page(id, "https://a.example/2", 5)).await.unwrap();

    let ids: Vec<_> = store
        .list_pages(&PageQuery::default())
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, vec![newer, older]);

    store.set_page_read(newer, true).await.unwrap();
    let unread = store
        .list_pages(&PageQuery {
            unread_only: true,
            ..PageQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].id, older);

    assert!(matches!(
        store.set_page_read(42, true).await,
        Err(StoreError::PageNotFound(42))
    ));
    store.delete_page(older).await.unwrap();
    assert!(store.delete_page(older).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn deleting_a_site_can_keep_or_drop_its_pages() {
    let store = MemoryStore::new();
    let keep = store.insert_site(new_site(1, "keep")).await.unwrap();
    let drop = store.insert_site(new_site(1, "drop")).await.unwrap();
    store.insert_page(new_page(keep, "https://a.example/k", 0)).await.unwrap();
    store.insert_page(new_page(drop, "https://a.example/d", 0)).await.unwrap();

    store.delete_site(keep, false).await.unwrap();
    store.delete_site(drop, true).await.unwrap();

    let pages = store.list_pages(&PageQuery::default()).await.unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].site_id, keep);
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("store.ron");

    {
        let store = RonFileStore::open(&path).unwrap();
        let id = store.insert_site(new_site(1, "a")).await.unwrap();
        store
            .record_page(new_page(id, "https://a.example/1", 0), "https://a.example/1")
            .await
            .unwrap();
    }
    assert!(path.is_file());

    let reopened = RonFileStore::open(&path).unwrap();
    let sites = reopened.list_sites(None).await.unwrap();
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].last_url, "https://a.example/1");
    assert_eq!(reopened.list_pages(&PageQuery::default()).await.unwrap().len(), 1);

    // Ids keep counting after reopen.
    assert_eq!(reopened.insert_site(new_site(1, "b")).await.unwrap(), 2);
}

#[tokio::test]
async fn missing_file_opens_empty_and_corrupt_file_fails() {
    let dir = TempDir::new().unwrap();
    let store = RonFileStore::open(dir.path().join("absent.ron")).unwrap();
    assert!(store.list_sites(None).await.unwrap().is_empty());

    let corrupt = dir.path().join("corrupt.ron");
    fs::write(&corrupt, "this is not ron (").unwrap();
    assert!(matches!(
        RonFileStore::open(&corrupt),
        Err(StoreError::Corrupt(_))
    ));
}

#[tokio::test]
async fn failed_save_rolls_back_memory() {
    let dir = TempDir::new().unwrap();
    let parent = dir.path().join("data");
    let store = RonFileStore::open(parent.join("store.ron")).unwrap();

    // A plain file where the store directory should be makes every save fail.
    fs::write(&parent, "x").unwrap();
    assert!(store.insert_site(new_site(1, "a")).await.is_err());
    assert!(store.list_sites(None).await.unwrap().is_empty());
}
