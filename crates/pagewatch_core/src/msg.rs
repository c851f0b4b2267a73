/// How a finished cycle ended, as far as the state machine cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleResult {
    /// The candidate URL equals the stored last-seen URL.
    NoNewContent,
    /// A new page was ingested (or the write was suppressed after retirement).
    NewPage,
    /// Fetch or extraction failed.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// The runtime task was spawned.
    Started,
    /// The pending timer elapsed.
    TimerFired,
    /// Someone asked for an immediate check.
    CheckRequested,
    /// The in-flight cycle finished.
    CycleCompleted { result: CycleResult },
    /// The watcher is being evicted.
    StopRequested,
}
