mod commands;
mod config;
mod logging;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pagewatch_core::{PageId, SiteId, UserId};
use watch_logging::{watch_info, watch_warn};

use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};

/// Watches listing pages and records newly published items.
#[derive(Parser, Debug)]
#[command(name = "pagewatch", version)]
struct Cli {
    /// Path to the RON configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print listings as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch every stored site until Ctrl-C
    Run,

    /// List registered sites
    Sites {
        #[arg(long)]
        owner: Option<UserId>,
    },

    /// Verify and register a site, then run its first check
    Add(AddArgs),

    /// Change a site's configuration
    Update(UpdateArgs),

    /// Delete a site
    Remove {
        id: SiteId,
        /// Also delete the pages discovered for this site
        #[arg(long)]
        delete_pages: bool,
    },

    /// List discovered pages, newest first
    Pages {
        #[arg(long)]
        site: Option<SiteId>,
        #[arg(long)]
        owner: Option<UserId>,
        #[arg(long)]
        unread: bool,
    },

    /// Mark a page read (or unread)
    Read {
        page_id: PageId,
        #[arg(long)]
        unread: bool,
    },

    /// Delete a discovered page
    DeletePage { page_id: PageId },
}

#[derive(Args, Debug)]
struct AddArgs {
    #[arg(long)]
    title: String,
    /// Canonical site URL used to resolve relative links
    #[arg(long)]
    url: String,
    /// Page listing the newest items
    #[arg(long)]
    crawl_url: String,
    /// CSS selector for the newest item's link
    #[arg(long)]
    selector: String,
    #[arg(long, default_value_t = 1)]
    owner: UserId,
}

#[derive(Args, Debug)]
struct UpdateArgs {
    id: SiteId,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    crawl_url: Option<String>,
    #[arg(long)]
    selector: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, config_error) = AppConfig::load_or_default(&cli.config);
    let log_file = logging::initialize(&config.log);
    if let Some(err) = config_error {
        watch_warn!("config.fallback reason={}", err);
        eprintln!("Warning: {err}; using defaults");
    }
    watch_info!(
        "pagewatch.starting version={} config={} log_file={:?}",
        env!("CARGO_PKG_VERSION"),
        cli.config.display(),
        log_file
    );

    let app = commands::App::open(config, cli.json)?;
    app.execute(cli.command).await
}
