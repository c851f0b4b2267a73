use std::time::Duration;

/// Side effects requested by the watcher state machine; executed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start one fetch/extract/ingest cycle.
    RunCycle,
    /// Arm the single pending timer to fire after `after`.
    ArmTimer { after: Duration },
    /// Drop the pending timer, if any.
    CancelTimer,
    /// The failure threshold was reached; no further cycles will run.
    Disable { consecutive_failures: u32 },
}
