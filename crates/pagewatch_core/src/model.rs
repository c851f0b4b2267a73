//! Persisted records shared by the engine and the binary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SiteId = u64;
pub type PageId = u64;
pub type UserId = u64;

/// A registered web site polled for new items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub title: String,
    /// Canonical URL; relative item links are resolved against it.
    pub url: String,
    /// Page listing the newest items.
    pub crawl_url: String,
    /// CSS selector locating the newest-item anchor on `crawl_url`.
    pub selector: String,
    /// Candidate URL of the last ingested item. Empty until the first ingestion.
    #[serde(default)]
    pub last_url: String,
    pub owner: UserId,
}

impl Site {
    pub fn from_new(id: SiteId, new: NewSite) -> Self {
        Self {
            id,
            title: new.title,
            url: new.url,
            crawl_url: new.crawl_url,
            selector: new.selector,
            last_url: String::new(),
            owner: new.owner,
        }
    }

    /// Overwrites every provided field.
    pub fn apply(&mut self, changes: &SiteChanges) {
        let SiteChanges {
            title,
            url,
            crawl_url,
            selector,
        } = changes;
        for (field, value) in [
            (&mut self.title, title),
            (&mut self.url, url),
            (&mut self.crawl_url, crawl_url),
            (&mut self.selector, selector),
        ] {
            if let Some(value) = value {
                field.clone_from(value);
            }
        }
    }
}

/// Input for registering a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSite {
    pub title: String,
    pub url: String,
    pub crawl_url: String,
    pub selector: String,
    pub owner: UserId,
}

/// Fields changed by an update. `None` means "not provided"; `Some("")` is a value.
///
/// There is no last-seen URL field: only ingestion advances it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteChanges {
    pub title: Option<String>,
    pub url: Option<String>,
    pub crawl_url: Option<String>,
    pub selector: Option<String>,
}

impl SiteChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.url.is_none()
            && self.crawl_url.is_none()
            && self.selector.is_none()
    }

    /// Names of the provided fields, for log lines.
    pub fn field_names(&self) -> Vec<&'static str> {
        [
            ("title", self.title.is_some()),
            ("url", self.url.is_some()),
            ("crawl_url", self.crawl_url.is_some()),
            ("selector", self.selector.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect()
    }
}

/// One ingested item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub site_id: SiteId,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default)]
    pub description: String,
    pub discovered_at: DateTime<Utc>,
    pub is_read: bool,
    pub owner: UserId,
}

impl Page {
    pub fn from_new(id: PageId, new: NewPage) -> Self {
        Self {
            id,
            site_id: new.site_id,
            title: new.title,
            url: new.url,
            thumbnail_url: new.thumbnail_url,
            description: new.description,
            discovered_at: new.discovered_at,
            is_read: false,
            owner: new.owner,
        }
    }
}

/// Input for inserting a page; stores assign the id and mark it unread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPage {
    pub site_id: SiteId,
    pub owner: UserId,
    pub title: String,
    pub url: String,
    pub thumbnail_url: String,
    pub description: String,
    pub discovered_at: DateTime<Utc>,
}

/// Filter for listing pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageQuery {
    pub site_id: Option<SiteId>,
    pub owner: Option<UserId>,
    pub unread_only: bool,
}

impl PageQuery {
    pub fn matches(&self, page: &Page) -> bool {
        self.site_id.map_or(true, |id| page.site_id == id)
            && self.owner.map_or(true, |owner| page.owner == owner)
            && !(self.unread_only && page.is_read)
    }
}
