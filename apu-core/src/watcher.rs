//! Process watcher - automatic profile switching
//!
//! Every tick scans the running processes, evaluates the trigger rules of the
//! current profile set and feeds two independent debounce machines:
//!
//! - **Forward**: the same winning profile must be seen `threshold` ticks in a
//!   row before it is applied.
//! - **Revert**: while an automatically activated profile with a
//!   `revertProfile` is active, `threshold` ticks without any match switch to
//!   the revert target. Any match cancels the count.
//!
//! Failures inside a tick are logged and leave both machines untouched.

use crate::config::clamp_poll_interval;
use crate::events::EventBus;
use crate::matcher::PatternMatcher;
use crate::process::ProcessSource;
use crate::profile::ProfileManager;
use crate::state::{activate_profile, SharedState};
use apu_error::{ApuError, Result};
use apu_protocol::ActivatedBy;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Log every Nth consecutive failure after the first
const ERROR_LOG_EVERY: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum ForwardState {
    #[default]
    Idle,
    Accumulating { name: String, count: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum RevertState {
    #[default]
    Inactive,
    Accumulating { count: u32 },
}

#[derive(Debug, Default)]
struct Debounce {
    forward: ForwardState,
    revert: RevertState,
    consecutive_errors: u32,
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A previous tick was still running
    Skipped,
    NoMatch,
    Pending { name: String, count: u32 },
    /// The winning profile is already active
    AlreadyActive(String),
    Switched(String),
    RevertPending { target: String, count: u32 },
    Reverted(String),
    /// Scan or apply failed; debounce state kept as it was
    Failed,
}

pub struct ProcessWatcher {
    manager: Arc<ProfileManager>,
    state: SharedState,
    events: EventBus,
    source: Arc<dyn ProcessSource>,
    interval: Duration,
    threshold: u32,
    matcher: RwLock<PatternMatcher>,
    debounce: Mutex<Debounce>,
    running: AtomicBool,
    stop_notify: Notify,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ProcessWatcher {
    pub fn new(
        manager: Arc<ProfileManager>,
        state: SharedState,
        events: EventBus,
        source: Arc<dyn ProcessSource>,
        interval_ms: u64,
        threshold: u32,
    ) -> Self {
        let interval = clamp_poll_interval(interval_ms);
        if threshold == 0 {
            warn!("Debounce threshold 0 is invalid, using 1");
        }
        let watcher = Self {
            manager,
            state,
            events,
            source,
            interval,
            threshold: threshold.max(1),
            matcher: RwLock::new(PatternMatcher::default()),
            debounce: Mutex::new(Debounce::default()),
            running: AtomicBool::new(false),
            stop_notify: Notify::new(),
            task: parking_lot::Mutex::new(None),
        };
        watcher.refresh_profiles();
        watcher
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Rebuild the compiled trigger set from the live profile list
    pub fn refresh_profiles(&self) {
        let matcher = PatternMatcher::compile(&self.manager.list());
        debug!("Watcher tracking {} trigger(s)", matcher.triggers().len());
        *self.matcher.write() = matcher;
    }

    /// Spawn the tick loop. Calling it on a running watcher does nothing.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Process watcher already running");
            return;
        }
        let watcher = Arc::clone(self);
        let handle = tokio::spawn(async move { watcher.run().await });
        *self.task.lock() = Some(handle);
    }

    /// Stop the loop and wait for an in-flight tick to finish
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stop_notify.notify_one();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Process watcher task ended abnormally: {}", e);
            }
        }
    }

    async fn run(&self) {
        info!(
            "Process watcher started (interval {}ms, threshold {})",
            self.interval.as_millis(),
            self.threshold
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.stop_notify.notified() => break,
            }
            if !self.is_running() {
                break;
            }
            self.tick().await;
        }
        info!("Process watcher stopped");
    }

    /// One scan/evaluate/act cycle. Never overlaps another tick.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(mut debounce) = self.debounce.try_lock() else {
            debug!("Previous watcher tick still running, skipping");
            return TickOutcome::Skipped;
        };

        self.refresh_profiles();

        let lines = match self.scan().await {
            Ok(lines) => lines,
            Err(e) => {
                note_failure(&mut debounce, "Process scan failed", &e);
                return TickOutcome::Failed;
            }
        };

        let matched = self
            .matcher
            .read()
            .evaluate(&lines)
            .map(|t| t.profile_name.clone());

        let (active, activated_by) = {
            let state = self.state.read().await;
            (state.active_profile.clone(), state.activated_by)
        };

        let outcome = match matched {
            Some(name) => self.on_match(&mut debounce, name, &active).await,
            None => self.on_no_match(&mut debounce, &active, activated_by).await,
        };

        match &outcome {
            TickOutcome::Failed => {}
            _ if debounce.consecutive_errors > 0 => {
                debug!("Process watcher recovered after {} error(s)", debounce.consecutive_errors);
                debounce.consecutive_errors = 0;
            }
            _ => {}
        }
        outcome
    }

    async fn scan(&self) -> Result<Vec<String>> {
        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || source.scan())
            .await
            .map_err(|e| ApuError::generic(format!("process scan task failed: {}", e)))?
    }

    async fn on_match(&self, debounce: &mut Debounce, name: String, active: &str) -> TickOutcome {
        debounce.revert = RevertState::Inactive;

        let count = match &debounce.forward {
            ForwardState::Accumulating { name: candidate, count } if *candidate == name => {
                count.saturating_add(1)
            }
            _ => 1,
        };
        debounce.forward = ForwardState::Accumulating { name: name.clone(), count };

        if count < self.threshold {
            debug!(profile = %name, "Trigger matched ({}/{})", count, self.threshold);
            return TickOutcome::Pending { name, count };
        }
        if name == active {
            return TickOutcome::AlreadyActive(name);
        }

        match self.activate(&name).await {
            Ok(()) => {
                info!(profile = %name, "Switched profile on process trigger");
                debounce.forward = ForwardState::Idle;
                TickOutcome::Switched(name)
            }
            Err(e) => {
                note_failure(debounce, "Automatic switch failed", &e);
                TickOutcome::Failed
            }
        }
    }

    async fn on_no_match(&self, debounce: &mut Debounce, active: &str, activated_by: ActivatedBy) -> TickOutcome {
        debounce.forward = ForwardState::Idle;

        let target = (activated_by == ActivatedBy::Auto)
            .then(|| self.manager.get(active))
            .flatten()
            .and_then(|p| p.match_rule.revert_profile)
            .filter(|target| target != active);

        let Some(target) = target else {
            debounce.revert = RevertState::Inactive;
            return TickOutcome::NoMatch;
        };

        let count = match debounce.revert {
            RevertState::Accumulating { count } => count.saturating_add(1),
            RevertState::Inactive => 1,
        };
        debounce.revert = RevertState::Accumulating { count };

        if count < self.threshold {
            debug!(profile = %active, "No trigger running, revert to {} pending ({}/{})", target, count, self.threshold);
            return TickOutcome::RevertPending { target, count };
        }

        match self.activate(&target).await {
            Ok(()) => {
                info!(profile = %target, "Reverted from {} after trigger ended", active);
                debounce.revert = RevertState::Inactive;
                TickOutcome::Reverted(target)
            }
            Err(e) => {
                note_failure(debounce, "Automatic revert failed", &e);
                TickOutcome::Failed
            }
        }
    }

    async fn activate(&self, name: &str) -> Result<()> {
        activate_profile(&self.manager, &self.state, &self.events, name, ActivatedBy::Auto)
            .await
            .map(|_| ())
    }
}

fn note_failure(debounce: &mut Debounce, what: &str, err: &ApuError) {
    debounce.consecutive_errors = debounce.consecutive_errors.saturating_add(1);
    let count = debounce.consecutive_errors;
    if count == 1 || count % ERROR_LOG_EVERY == 0 {
        error!("{} (count: {}): {}", what, count, err);
    } else {
        debug!("{} (count: {}): {}", what, count, err);
    }
}
