//! Pagewatch engine: fetching, extraction, persistence and the watcher runtime.
mod cycle;
mod decode;
mod extract;
mod fetch;
mod persist;
mod pool;
mod store;
mod types;
mod watcher;

pub use cycle::{probe, run_cycle, Clock, CycleContext, CycleError, CycleOutcome, WriteGate};
pub use decode::{decode_html, DecodeError, DecodedHtml};
pub use extract::{
    extract_metadata, find_candidate_url, parse_selector, resolve_link, ExtractError,
    PageMetadata,
};
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher, DEFAULT_USER_AGENT};
pub use persist::{ensure_dir, AtomicFileWriter, PersistError, RonFileStore};
pub use pool::{PoolError, WatcherPool};
pub use store::{MemoryStore, SiteStore, StoreError, Tables};
pub use types::{FailureKind, FetchError, FetchMetadata, FetchOutput, FetchedDocument};
pub use watcher::Watcher;
