use crate::{CycleResult, Effect, Msg, WatcherState, WatcherStatus};

/// Pure update function: applies a message to a watcher and returns the effects to run.
pub fn update(mut state: WatcherState, msg: Msg) -> (WatcherState, Vec<Effect>) {
    // Stopped is terminal: late timer fires and cycle completions are dropped.
    if state.status() == WatcherStatus::Stopped {
        return (state, Vec::new());
    }

    let effects = match msg {
        Msg::Started => {
            if state.status() != WatcherStatus::Idle || state.timer_armed() {
                return (state, Vec::new());
            }
            state.set_status(WatcherStatus::Polling);
            state.set_timer_armed(true);
            vec![
                Effect::RunCycle,
                Effect::ArmTimer {
                    after: state.policy().interval,
                },
            ]
        }
        Msg::TimerFired => {
            state.set_timer_armed(false);
            match state.status() {
                WatcherStatus::Idle => {
                    state.set_status(WatcherStatus::Polling);
                    vec![Effect::RunCycle]
                }
                // Skipped; the completing cycle rearms.
                WatcherStatus::Polling => Vec::new(),
                WatcherStatus::Disabled | WatcherStatus::Stopped => Vec::new(),
            }
        }
        Msg::CheckRequested => {
            if state.status() != WatcherStatus::Idle {
                return (state, Vec::new());
            }
            state.set_status(WatcherStatus::Polling);
            let mut effects = Vec::with_capacity(2);
            if state.timer_armed() {
                state.set_timer_armed(false);
                effects.push(Effect::CancelTimer);
            }
            effects.push(Effect::RunCycle);
            effects
        }
        Msg::CycleCompleted { result } => {
            if state.status() != WatcherStatus::Polling {
                return (state, Vec::new());
            }
            match result {
                CycleResult::NoNewContent | CycleResult::NewPage => {
                    state.record_success();
                    state.set_status(WatcherStatus::Idle);
                    rearm(&mut state)
                }
                CycleResult::Failed => {
                    let failures = state.record_failure();
                    if failures >= state.policy().disable_threshold {
                        state.set_status(WatcherStatus::Disabled);
                        let mut effects = Vec::with_capacity(2);
                        if state.timer_armed() {
                            state.set_timer_armed(false);
                            effects.push(Effect::CancelTimer);
                        }
                        effects.push(Effect::Disable {
                            consecutive_failures: failures,
                        });
                        effects
                    } else {
                        state.set_status(WatcherStatus::Idle);
                        rearm(&mut state)
                    }
                }
            }
        }
        Msg::StopRequested => {
            state.set_status(WatcherStatus::Stopped);
            if state.timer_armed() {
                state.set_timer_armed(false);
                vec![Effect::CancelTimer]
            } else {
                Vec::new()
            }
        }
    };

    (state, effects)
}

fn rearm(state: &mut WatcherState) -> Vec<Effect> {
    if state.timer_armed() {
        return Vec::new();
    }
    state.set_timer_armed(true);
    vec![Effect::ArmTimer {
        after: state.policy().interval,
    }]
}
