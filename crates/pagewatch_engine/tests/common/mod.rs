#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use pagewatch_core::{NewSite, WatchPolicy, WatcherView};
use pagewatch_engine::{FailureKind, FetchError, FetchMetadata, FetchOutput, Fetcher};
use tokio::sync::watch;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(watch_logging::initialize_for_tests);
}

#[derive(Debug, Clone)]
pub enum Reply {
    Html(String),
    Fail(FailureKind),
}

#[derive(Default)]
struct Route {
    script: VecDeque<Reply>,
    fallback: Option<Reply>,
    calls: usize,
}

/// In-process fetcher serving canned documents per URL.
///
/// Scripted replies are consumed first, then the fallback repeats. Unknown
/// URLs answer 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Route>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn page(&self, url: &str, html: &str) {
        self.routes.lock().unwrap().entry(url.to_string()).or_default().fallback =
            Some(Reply::Html(html.to_string()));
    }

    pub fn fail(&self, url: &str) {
        self.routes.lock().unwrap().entry(url.to_string()).or_default().fallback =
            Some(Reply::Fail(FailureKind::Network));
    }

    pub fn script(&self, url: &str, replies: Vec<Reply>) {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .script
            .extend(replies);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.routes
            .lock()
            .unwrap()
            .get(url)
            .map_or(0, |route| route.calls)
    }

    pub fn total_calls(&self) -> usize {
        self.routes
            .lock()
            .unwrap()
            .values()
            .map(|route| route.calls)
            .sum()
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchOutput, FetchError> {
        let reply = {
            let mut routes = self.routes.lock().unwrap();
            let route = routes.entry(url.to_string()).or_default();
            route.calls += 1;
            route.script.pop_front().or_else(|| route.fallback.clone())
        };
        match reply {
            Some(Reply::Html(html)) => Ok(FetchOutput {
                metadata: FetchMetadata {
                    original_url: url.to_string(),
                    final_url: url.to_string(),
                    redirect_count: 0,
                    content_type: Some("text/html; charset=utf-8".to_string()),
                    byte_len: html.len() as u64,
                },
                bytes: html.into_bytes(),
            }),
            Some(Reply::Fail(kind)) => Err(FetchError::new(kind, "scripted failure")),
            None => Err(FetchError::new(FailureKind::HttpStatus(404), "no route")),
        }
    }
}

pub const BASE: &str = "https://news.example";
pub const CRAWL: &str = "https://news.example/list";

pub fn listing(href: &str) -> String {
    format!(
        r#"<html><body><ul>
            <li><a class="item" href="{href}">Newest</a></li>
            <li><a class="item" href="/old">Older</a></li>
        </ul></body></html>"#
    )
}

pub fn article(title: &str) -> String {
    format!(
        r#"<html><head>
            <title>{title} | News</title>
            <meta property="og:title" content="{title}">
            <meta property="og:description" content="About {title}">
        </head><body><p>{title}</p></body></html>"#
    )
}

pub fn new_site(selector: &str) -> NewSite {
    NewSite {
        title: "News".to_string(),
        url: BASE.to_string(),
        crawl_url: CRAWL.to_string(),
        selector: selector.to_string(),
        owner: 1,
    }
}

pub fn fast_policy() -> WatchPolicy {
    WatchPolicy {
        interval: Duration::from_millis(10),
        disable_threshold: 10,
    }
}

/// Waits until the watcher's published view satisfies `pred`.
pub async fn wait_for_view(
    rx: &mut watch::Receiver<WatcherView>,
    pred: impl FnMut(&WatcherView) -> bool,
) -> WatcherView {
    let view = tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for watcher view")
        .expect("watcher channel closed");
    *view
}

/// Polls `check` until it returns true.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
