//! Pagewatch core: site/page model and the pure watcher state machine.
mod effect;
mod model;
mod msg;
mod state;
mod update;

pub use effect::Effect;
pub use model::{
    NewPage, NewSite, Page, PageId, PageQuery, Site, SiteChanges, SiteId, UserId,
};
pub use msg::{CycleResult, Msg};
pub use state::{
    WatchPolicy, WatcherState, WatcherStatus, WatcherView, DEFAULT_DISABLE_THRESHOLD,
    DEFAULT_INTERVAL,
};
pub use update::update;
