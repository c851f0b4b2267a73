use std::time::Duration;

use crate::SiteId;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_DISABLE_THRESHOLD: u32 = 10;

/// Scheduling knobs shared by every watcher in a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchPolicy {
    pub interval: Duration,
    /// Consecutive failed cycles after which the watcher stops polling.
    pub disable_threshold: u32,
}

impl Default for WatchPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            disable_threshold: DEFAULT_DISABLE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatcherStatus {
    /// Waiting for the timer; no cycle in flight.
    #[default]
    Idle,
    /// A cycle is in flight.
    Polling,
    /// Failure threshold reached. Terminal until the watcher is recreated.
    Disabled,
    /// Stopped by the pool; terminal.
    Stopped,
}

/// Runtime state of one watcher. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherState {
    site_id: SiteId,
    policy: WatchPolicy,
    status: WatcherStatus,
    consecutive_failures: u32,
    timer_armed: bool,
    cycles_completed: u64,
}

/// Read-only snapshot published after every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherView {
    pub site_id: SiteId,
    pub status: WatcherStatus,
    pub consecutive_failures: u32,
    pub timer_armed: bool,
    pub cycles_completed: u64,
}

impl WatcherState {
    pub fn new(site_id: SiteId, policy: WatchPolicy) -> Self {
        Self {
            site_id,
            policy,
            status: WatcherStatus::Idle,
            consecutive_failures: 0,
            timer_armed: false,
            cycles_completed: 0,
        }
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    pub fn policy(&self) -> WatchPolicy {
        self.policy
    }

    pub fn status(&self) -> WatcherStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    pub fn view(&self) -> WatcherView {
        WatcherView {
            site_id: self.site_id,
            status: self.status,
            consecutive_failures: self.consecutive_failures,
            timer_armed: self.timer_armed,
            cycles_completed: self.cycles_completed,
        }
    }

    pub(crate) fn set_status(&mut self, status: WatcherStatus) {
        self.status = status;
    }

    pub(crate) fn set_timer_armed(&mut self, armed: bool) {
        self.timer_armed = armed;
    }

    pub(crate) fn record_success(&mut self) {
        self.cycles_completed += 1;
        self.consecutive_failures = 0;
    }

    /// Returns the new failure count.
    pub(crate) fn record_failure(&mut self) -> u32 {
        self.cycles_completed += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }
}
