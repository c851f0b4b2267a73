//! Runtime for one site: a tokio task driving the pure watcher state machine.

use std::collections::VecDeque;

use futures_util::future::{BoxFuture, FutureExt, OptionFuture};
use pagewatch_core::{
    update, CycleResult, Effect, Msg, Site, SiteId, WatchPolicy, WatcherState, WatcherView,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use watch_logging::{watch_debug, watch_error, watch_info, watch_warn};

use crate::cycle::{run_cycle, CycleContext, CycleError, CycleOutcome, WriteGate};

#[derive(Debug)]
enum WatcherCommand {
    CheckNow,
}

struct RunningWatcher {
    cmd_tx: mpsc::UnboundedSender<WatcherCommand>,
    cancel: CancellationToken,
    gate: WriteGate,
    _task: JoinHandle<()>,
}

/// Polls one site. Constructed idle; `start` spawns the task.
pub struct Watcher {
    site: Site,
    ctx: CycleContext,
    policy: WatchPolicy,
    view_tx: watch::Sender<WatcherView>,
    running: Option<RunningWatcher>,
}

impl Watcher {
    pub fn new(site: Site, ctx: CycleContext, policy: WatchPolicy) -> Self {
        let (view_tx, _) = watch::channel(WatcherState::new(site.id, policy).view());
        Self {
            site,
            ctx,
            policy,
            view_tx,
            running: None,
        }
    }

    pub fn site_id(&self) -> SiteId {
        self.site.id
    }

    /// The configuration this watcher was built from.
    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn is_started(&self) -> bool {
        self.running.is_some()
    }

    pub fn view(&self) -> WatcherView {
        *self.view_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WatcherView> {
        self.view_tx.subscribe()
    }

    /// Runs one cycle immediately and schedules the following ones. Must be
    /// called from within a tokio runtime. Starting twice is a no-op.
    pub fn start(&mut self) {
        if self.running.is_some() {
            return;
        }
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let gate = WriteGate::new();
        let task = tokio::spawn(run_watcher(WatcherTask {
            site: self.site.clone(),
            ctx: self.ctx.clone(),
            state: WatcherState::new(self.site.id, self.policy),
            view_tx: self.view_tx.clone(),
            cmd_rx,
            cancel: cancel.clone(),
            gate: gate.clone(),
        }));
        watch_info!(
            "watcher.started site_id={} interval_secs={}",
            self.site.id,
            self.policy.interval.as_secs()
        );
        self.running = Some(RunningWatcher {
            cmd_tx,
            cancel,
            gate,
            _task: task,
        });
    }

    /// Asks for an immediate cycle. Ignored while a cycle is in flight or once disabled.
    pub fn check_now(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| running.cmd_tx.send(WatcherCommand::CheckNow).is_ok())
    }

    /// Cancels the pending timer and retires the watcher.
    ///
    /// An in-flight fetch is not aborted, but once this returns none of its
    /// results can reach storage.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.gate.retire().await;
        running.cancel.cancel();
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

type CycleFuture = BoxFuture<'static, Result<CycleOutcome, CycleError>>;

struct WatcherTask {
    site: Site,
    ctx: CycleContext,
    state: WatcherState,
    view_tx: watch::Sender<WatcherView>,
    cmd_rx: mpsc::UnboundedReceiver<WatcherCommand>,
    cancel: CancellationToken,
    gate: WriteGate,
}

async fn run_watcher(mut task: WatcherTask) {
    let mut timer: Option<Instant> = None;
    let mut in_flight: Option<CycleFuture> = None;
    let mut inbox = VecDeque::from([Msg::Started]);

    loop {
        while let Some(msg) = inbox.pop_front() {
            let (next, effects) = update(task.state, msg);
            task.state = next;
            for effect in effects {
                apply_effect(&task, effect, &mut timer, &mut in_flight);
            }
            task.view_tx.send_replace(task.state.view());
        }

        tokio::select! {
            biased;
            _ = task.cancel.cancelled() => break,
            Some(result) = OptionFuture::from(in_flight.as_mut()), if in_flight.is_some() => {
                in_flight = None;
                inbox.push_back(Msg::CycleCompleted {
                    result: settle(&mut task.site, result),
                });
            }
            _ = sleep_until(timer.unwrap_or_else(Instant::now)), if timer.is_some() => {
                timer = None;
                inbox.push_back(Msg::TimerFired);
            }
            command = task.cmd_rx.recv() => match command {
                Some(WatcherCommand::CheckNow) => inbox.push_back(Msg::CheckRequested),
                // Handle dropped without stop(): treat as eviction.
                None => break,
            },
        }
    }

    // The cycle may hold the gate mid-write, so it has to keep being polled
    // while the gate is retired.
    let drain = async {
        if let Some(cycle) = in_flight.take() {
            let _ = cycle.await;
        }
    };
    tokio::join!(task.gate.retire(), drain);

    let (state, _) = update(task.state, Msg::StopRequested);
    task.view_tx.send_replace(state.view());
    watch_debug!("watcher.stopped site_id={}", task.site.id);
}

fn apply_effect(
    task: &WatcherTask,
    effect: Effect,
    timer: &mut Option<Instant>,
    in_flight: &mut Option<CycleFuture>,
) {
    match effect {
        Effect::RunCycle => {
            let ctx = task.ctx.clone();
            let site = task.site.clone();
            let gate = task.gate.clone();
            *in_flight = Some(async move { run_cycle(&ctx, &site, &gate).await }.boxed());
        }
        Effect::ArmTimer { after } => *timer = Some(Instant::now() + after),
        Effect::CancelTimer => *timer = None,
        Effect::Disable {
            consecutive_failures,
        } => {
            *timer = None;
            watch_error!(
                "watcher.disabled site_id={} title={:?} failures={} action=\"update or remove the site to resume\"",
                task.site.id,
                task.site.title,
                consecutive_failures
            );
        }
    }
}

/// Folds a finished cycle into the watcher's own copy of the site.
fn settle(site: &mut Site, result: Result<CycleOutcome, CycleError>) -> CycleResult {
    match result {
        Ok(outcome) => {
            if let CycleOutcome::Ingested { candidate, .. } = &outcome {
                site.last_url.clone_from(candidate);
            }
            outcome.result()
        }
        Err(err) => {
            watch_warn!(
                "cycle.failed site_id={} title={:?} crawl_url={} error={}",
                site.id,
                site.title,
                site.crawl_url,
                err
            );
            CycleResult::Failed
        }
    }
}
