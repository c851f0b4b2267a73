//! Subcommand handlers.

use std::sync::Arc;

use anyhow::{bail, Context};
use pagewatch_core::{NewSite, Page, PageQuery, Site, SiteChanges, SiteId, WatcherStatus};
use pagewatch_engine::{ReqwestFetcher, RonFileStore, SiteStore, WatcherPool};
use serde::Serialize;
use watch_logging::{watch_info, watch_warn};

use crate::config::AppConfig;
use crate::{AddArgs, Command, UpdateArgs};

pub struct App {
    config: AppConfig,
    store: Arc<RonFileStore>,
    json: bool,
}

impl App {
    pub fn open(config: AppConfig, json: bool) -> anyhow::Result<Self> {
        let store = RonFileStore::open(&config.store_path)
            .with_context(|| format!("opening store {}", config.store_path.display()))?;
        Ok(Self {
            config,
            store: Arc::new(store),
            json,
        })
    }

    fn pool(&self) -> WatcherPool {
        WatcherPool::new(
            Arc::new(ReqwestFetcher::new(self.config.fetch_settings())),
            self.store.clone(),
            self.config.watch_policy(),
        )
    }

    pub async fn execute(&self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Run => self.run().await,
            Command::Sites { owner } => {
                let sites = self.store.list_sites(owner).await?;
                self.print_sites(&sites)
            }
            Command::Add(args) => self.add(args).await,
            Command::Update(args) => self.update(args).await,
            Command::Remove { id, delete_pages } => {
                self.pool().remove(id, delete_pages).await?;
                println!("removed site {id}");
                Ok(())
            }
            Command::Pages {
                site,
                owner,
                unread,
            } => {
                let pages = self
                    .store
                    .list_pages(&PageQuery {
                        site_id: site,
                        owner,
                        unread_only: unread,
                    })
                    .await?;
                self.print_pages(&pages)
            }
            Command::Read { page_id, unread } => {
                self.store.set_page_read(page_id, !unread).await?;
                Ok(())
            }
            Command::DeletePage { page_id } => {
                self.store.delete_page(page_id).await?;
                Ok(())
            }
        }
    }

    async fn run(&self) -> anyhow::Result<()> {
        let pool = self.pool();
        let loaded = pool.load_all(self.config.owner).await?;
        pool.start_all().await;
        println!("watching {loaded} site(s); press Ctrl-C to stop");

        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")?;
        watch_info!("pagewatch.stopping reason=interrupt");
        pool.shutdown().await;
        Ok(())
    }

    async fn add(&self, args: AddArgs) -> anyhow::Result<()> {
        let pool = self.pool();
        let id = pool
            .add(NewSite {
                title: args.title,
                url: args.url,
                crawl_url: args.crawl_url,
                selector: args.selector,
                owner: args.owner,
            })
            .await?;
        println!("added site {id}");
        self.finish_first_check(&pool, id).await;
        Ok(())
    }

    async fn update(&self, args: UpdateArgs) -> anyhow::Result<()> {
        let changes = SiteChanges {
            title: args.title,
            url: args.url,
            crawl_url: args.crawl_url,
            selector: args.selector,
        };
        if changes.is_empty() {
            bail!("nothing to update; pass at least one of --title, --url, --crawl-url, --selector");
        }
        let pool = self.pool();
        pool.update(args.id, changes).await?;
        println!("updated site {}", args.id);
        self.finish_first_check(&pool, args.id).await;
        Ok(())
    }

    /// Lets the freshly started watcher complete its immediate check before
    /// the one-shot process exits.
    async fn finish_first_check(&self, pool: &WatcherPool, id: SiteId) {
        if let Some(mut rx) = pool.subscribe(id).await {
            let limit = self.config.fetch_settings().request_timeout * 3;
            let timed_out = tokio::time::timeout(
                limit,
                rx.wait_for(|view| {
                    view.cycles_completed > 0 || view.status == WatcherStatus::Stopped
                }),
            )
            .await
            .is_err();
            if timed_out {
                watch_warn!("site.first_check_timeout site_id={} waited_secs={}", id, limit.as_secs());
            }
        }
        pool.shutdown().await;
    }

    fn print_sites(&self, sites: &[Site]) -> anyhow::Result<()> {
        if self.json {
            return print_json(sites);
        }
        for site in sites {
            println!(
                "{:>4}  {}  [{}]  {}  selector={:?}  last={}",
                site.id,
                site.title,
                site.owner,
                site.crawl_url,
                site.selector,
                none_if_empty(&site.last_url)
            );
        }
        Ok(())
    }

    fn print_pages(&self, pages: &[Page]) -> anyhow::Result<()> {
        if self.json {
            return print_json(pages);
        }
        for page in pages {
            println!(
                "{:>5} {} {}  site={}  {}\n      {}",
                page.id,
                if page.is_read { " " } else { "*" },
                page.discovered_at.format("%Y-%m-%d %H:%M"),
                page.site_id,
                page.title,
                page.url
            );
        }
        Ok(())
    }
}

fn none_if_empty(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
