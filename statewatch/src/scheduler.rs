//! State-aware periodic scheduler.
//!
//! A single worker thread drives ticks. Each tick first checks the required
//! states (restoring them through transitions when configured) and then runs
//! the monitoring task. Ticks never overlap: a tick that overruns its interval
//! delays the next one.
//!
//! Lifecycle: `Idle -> Scheduled -> (Verifying -> Running -> Scheduled)* ->
//! Stopping -> Stopped`. `Stopped` is terminal; the [`Monitor`] is moved into
//! the worker on start, so a stopped scheduler cannot be restarted.
//!
//! Stopping happens after `max_iterations` ticks (at the slot the next tick
//! would have used), once `total_duration` elapses, or on [`StateAwareScheduler::stop`],
//! whichever comes first. The shutdown action always runs exactly once. If the
//! in-flight tick does not finish within the grace period, the scheduler is
//! marked stopped anyway and the worker is left to exit at its next safe point.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use tracing::{debug, error, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::catalog::validate_required_states;
use crate::monitor::Monitor;
use crate::verify::restore_states;

/// Scheduler options, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub initial_delay: Duration,
    pub check_interval: Duration,
    pub max_iterations: Option<u32>,
    pub total_duration: Option<Duration>,
    pub required_states: Vec<String>,
    pub rebuild_on_mismatch: bool,
    pub skip_if_states_missing: bool,
    /// How long a stop waits for the in-flight tick before forcing.
    pub stop_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            check_interval: Duration::from_secs(1),
            max_iterations: None,
            total_duration: None,
            required_states: Vec::new(),
            rebuild_on_mismatch: true,
            skip_if_states_missing: true,
            stop_grace: Duration::from_secs(2),
        }
    }
}

impl SchedulerConfig {
    /// Every problem that would make the schedule impossible to run.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.check_interval.is_zero() {
            errors.push("check_interval must be > 0".to_string());
        }
        if self.total_duration.is_some_and(|total| total.is_zero()) {
            errors.push("total_duration must be > 0 when set".to_string());
        }
        errors.extend(self.range_errors());
        errors
    }

    /// Bounds whose deadlines cannot be represented as an `Instant`.
    pub fn range_errors(&self) -> Vec<String> {
        let now = Instant::now();
        let mut errors = Vec::new();
        if now.checked_add(self.initial_delay).is_none() {
            errors.push("initial_delay is out of range".to_string());
        }
        if let Some(max) = self.max_iterations {
            let stop = self
                .iteration_stop_offset(max)
                .and_then(|offset| now.checked_add(offset));
            if stop.is_none() {
                errors.push(format!(
                    "max_iterations ({}) x check_interval is out of range",
                    max
                ));
            }
        }
        if let Some(total) = self.total_duration {
            if now.checked_add(total).is_none() {
                errors.push("total_duration is out of range".to_string());
            }
        }
        errors
    }

    /// `initial_delay + max * check_interval`: when the iteration cap stops
    /// the scheduler.
    fn iteration_stop_offset(&self, max: u32) -> Option<Duration> {
        self.check_interval
            .checked_mul(max)?
            .checked_add(self.initial_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Verifying,
    Running,
    Stopping,
    Stopped,
}

/// What initiated stopping. The first cause wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxIterations,
    TotalDuration,
    Requested,
    /// The worker thread could not be started.
    StartFailed,
    /// The worker hit a panic outside a tick.
    WorkerPanicked,
}

/// Counters collected over the scheduler's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerReport {
    pub ticks: u32,
    /// Times the monitoring task was invoked.
    pub task_runs: u32,
    /// Ticks that skipped the task because required states were missing.
    pub skipped: u32,
    /// Ticks whose task returned an error or that panicked.
    pub failed: u32,
    pub stop_reason: StopReason,
    /// The in-flight tick outlived the grace period.
    pub forced: bool,
}

/// `SchedulerFatal`: the only errors `start` reports.
#[derive(Debug)]
pub enum SchedulerError {
    AlreadyStarted,
    AlreadyStopped,
    Spawn(std::io::Error),
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::AlreadyStarted => f.write_str("scheduler already started"),
            SchedulerError::AlreadyStopped => {
                f.write_str("scheduler stopped; construct a new one to run again")
            }
            SchedulerError::Spawn(err) => write!(f, "failed to spawn scheduler thread: {}", err),
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchedulerError::Spawn(err) => Some(err),
            _ => None,
        }
    }
}

/// Handed to the monitoring task on every tick.
pub struct TickContext<'a> {
    /// 1-indexed tick number.
    pub iteration: u32,
    pub monitor: &'a mut Monitor,
    /// Set once a stop is requested; long tasks should check it between steps.
    pub cancel: &'a CancelToken,
}

pub type MonitoringTask = Box<dyn FnMut(&mut TickContext<'_>) -> Result<()> + Send>;
pub type ShutdownAction = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Ran,
    TaskFailed,
    Skipped,
    Cancelled,
    Panicked { task_invoked: bool },
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    ticks: u32,
    task_runs: u32,
    skipped: u32,
    failed: u32,
}

struct Inner {
    state: SchedulerState,
    stop_reason: Option<StopReason>,
    counters: Counters,
    report: Option<SchedulerReport>,
    monitor: Option<Monitor>,
}

impl Inner {
    fn build_report(&self, forced: bool) -> SchedulerReport {
        SchedulerReport {
            ticks: self.counters.ticks,
            task_runs: self.counters.task_runs,
            skipped: self.counters.skipped,
            failed: self.counters.failed,
            stop_reason: self.stop_reason.unwrap_or(StopReason::Requested),
            forced,
        }
    }
}

/// State shared between the host handle, the worker and the deadline thread.
struct Shared {
    inner: Mutex<Inner>,
    changed: Condvar,
    cancel: CancelToken,
    shutdown: Mutex<Option<ShutdownAction>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SchedulerState::Idle,
                stop_reason: None,
                counters: Counters::default(),
                report: None,
                monitor: None,
            }),
            changed: Condvar::new(),
            cancel: CancelToken::new(),
            shutdown: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> SchedulerState {
        self.lock().state
    }

    /// Move between tick phases; never overrides `Stopping`/`Stopped`.
    fn enter_phase(&self, phase: SchedulerState) {
        let mut inner = self.lock();
        if matches!(
            inner.state,
            SchedulerState::Scheduled | SchedulerState::Verifying | SchedulerState::Running
        ) {
            inner.state = phase;
        }
    }

    fn request_stop(&self, reason: StopReason) {
        {
            let mut inner = self.lock();
            if inner.stop_reason.is_none() {
                inner.stop_reason = Some(reason);
            }
            if inner.state != SchedulerState::Stopped {
                inner.state = SchedulerState::Stopping;
            }
        }
        self.cancel.cancel();
        self.changed.notify_all();
    }

    /// Sleep until `deadline` (forever if `None`). Returns true if a stop was
    /// requested first.
    fn sleep_until(&self, deadline: Option<Instant>) -> bool {
        let mut inner = self.lock();
        loop {
            if inner.stop_reason.is_some() {
                return true;
            }
            inner = match deadline {
                None => self
                    .changed
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.changed
                        .wait_timeout(inner, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0)
                }
            };
        }
    }

    /// Wait for `Stopped`, up to `timeout` if given. Returns true once stopped.
    fn wait_stopped(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut inner = self.lock();
        loop {
            if inner.state == SchedulerState::Stopped {
                return true;
            }
            inner = match deadline {
                None => self
                    .changed
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.changed
                        .wait_timeout(inner, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0)
                }
            };
        }
    }

    fn record_tick(&self, outcome: TickOutcome) {
        let mut inner = self.lock();
        let counters = &mut inner.counters;
        counters.ticks += 1;
        match outcome {
            TickOutcome::Ran => counters.task_runs += 1,
            TickOutcome::TaskFailed => {
                counters.task_runs += 1;
                counters.failed += 1;
            }
            TickOutcome::Skipped => counters.skipped += 1,
            TickOutcome::Cancelled => {}
            TickOutcome::Panicked { task_invoked } => {
                if task_invoked {
                    counters.task_runs += 1;
                }
                counters.failed += 1;
            }
        }
        if matches!(
            inner.state,
            SchedulerState::Verifying | SchedulerState::Running
        ) {
            inner.state = SchedulerState::Scheduled;
        }
    }

    /// Run the shutdown action if nobody has yet.
    fn run_shutdown_once(&self) {
        let action = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(action) = action {
            debug!("running shutdown action");
            if catch_unwind(AssertUnwindSafe(action)).is_err() {
                error!("shutdown action panicked");
            }
        }
    }

    /// Orderly end of the worker: hand the monitor back and publish the report.
    fn finish(&self, monitor: Monitor) {
        {
            let mut inner = self.lock();
            inner.monitor = Some(monitor);
            if inner.state != SchedulerState::Stopped {
                inner.state = SchedulerState::Stopped;
                inner.report = Some(inner.build_report(false));
            }
        }
        self.changed.notify_all();
    }

    /// Give up on the in-flight tick: clean up and mark stopped now.
    fn force_stop(&self) {
        self.run_shutdown_once();
        {
            let mut inner = self.lock();
            if inner.state != SchedulerState::Stopped {
                inner.state = SchedulerState::Stopped;
                inner.report = Some(inner.build_report(true));
            }
        }
        self.changed.notify_all();
    }

    /// Terminal transition for a scheduler whose worker never ran.
    fn mark_stopped(&self, reason: StopReason) {
        {
            let mut inner = self.lock();
            inner.stop_reason.get_or_insert(reason);
            inner.state = SchedulerState::Stopped;
            inner.report = Some(inner.build_report(false));
        }
        self.cancel.cancel();
        self.changed.notify_all();
    }
}

/// Runs a monitoring task on a fixed period after verifying required states.
pub struct StateAwareScheduler {
    config: SchedulerConfig,
    pending: Option<(Monitor, MonitoringTask)>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    deadline: Option<JoinHandle<()>>,
}

impl StateAwareScheduler {
    /// Validate `config` against the monitor's catalog and build an idle scheduler.
    pub fn new<F>(config: SchedulerConfig, monitor: Monitor, task: F) -> Result<Self>
    where
        F: FnMut(&mut TickContext<'_>) -> Result<()> + Send + 'static,
    {
        let mut errors = config.validate();
        errors.extend(validate_required_states(
            monitor.catalog(),
            &config.required_states,
        ));
        if !errors.is_empty() {
            bail!("invalid scheduler config:\n- {}", errors.join("\n- "));
        }
        Ok(Self {
            config,
            pending: Some((monitor, Box::new(task))),
            shared: Arc::new(Shared::new()),
            worker: None,
            deadline: None,
        })
    }

    /// Action run exactly once when the scheduler terminates.
    pub fn with_shutdown_action<F>(self, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        *self
            .shared
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(action));
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            SchedulerState::Scheduled | SchedulerState::Verifying | SchedulerState::Running
        )
    }

    /// Arm the timer: first tick after `initial_delay`, then every `check_interval`.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        match self.state() {
            SchedulerState::Idle => {}
            SchedulerState::Stopped => return Err(SchedulerError::AlreadyStopped),
            _ => return Err(SchedulerError::AlreadyStarted),
        }
        let (monitor, task) = self.pending.take().ok_or(SchedulerError::AlreadyStopped)?;

        let started = Instant::now();
        self.shared.lock().state = SchedulerState::Scheduled;

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let spawned = thread::Builder::new()
            .name("statewatch-scheduler".to_string())
            .spawn(move || run_worker(shared, config, monitor, task, started));
        match spawned {
            Ok(handle) => self.worker = Some(handle),
            Err(err) => {
                error!(error = %err, "failed to spawn scheduler worker");
                self.shared.mark_stopped(StopReason::StartFailed);
                return Err(SchedulerError::Spawn(err));
            }
        }

        if let Some(deadline) = self
            .config
            .total_duration
            .and_then(|total| started.checked_add(total))
        {
            let shared = Arc::clone(&self.shared);
            let grace = self.config.stop_grace;
            let spawned = thread::Builder::new()
                .name("statewatch-deadline".to_string())
                .spawn(move || run_deadline(shared, deadline, grace));
            match spawned {
                Ok(handle) => self.deadline = Some(handle),
                Err(err) => {
                    error!(error = %err, "failed to spawn deadline thread");
                    self.shared.request_stop(StopReason::StartFailed);
                    return Err(SchedulerError::Spawn(err));
                }
            }
        }

        info!(
            initial_delay_ms = self.config.initial_delay.as_millis() as u64,
            check_interval_ms = self.config.check_interval.as_millis() as u64,
            max_iterations = ?self.config.max_iterations,
            total_duration_ms = ?self.config.total_duration.map(|d| d.as_millis() as u64),
            "scheduler started"
        );
        Ok(())
    }

    /// Request a stop and wait up to the grace period for the in-flight tick.
    ///
    /// The shutdown action has run by the time this returns. Stopping an idle
    /// scheduler makes it terminal as well.
    pub fn stop(&mut self) {
        match self.state() {
            SchedulerState::Stopped => return,
            SchedulerState::Idle => {
                self.pending = None;
                self.shared.mark_stopped(StopReason::Requested);
                self.shared.run_shutdown_once();
                return;
            }
            _ => {}
        }
        info!("stop requested");
        self.shared.request_stop(StopReason::Requested);
        if !self.shared.wait_stopped(Some(self.config.stop_grace)) {
            warn!(
                grace_ms = self.config.stop_grace.as_millis() as u64,
                "in-flight tick exceeded stop grace period; forcing stop"
            );
            self.shared.force_stop();
        }
        self.reap_threads();
    }

    /// Wait up to `timeout` for the scheduler to stop on its own.
    pub fn wait(&mut self, timeout: Duration) -> Option<SchedulerReport> {
        if self.shared.wait_stopped(Some(timeout)) {
            self.reap_threads();
        }
        self.report()
    }

    /// Block until the scheduler stops. Returns immediately if it never started.
    pub fn join(&mut self) -> Option<SchedulerReport> {
        if self.state() == SchedulerState::Idle {
            return None;
        }
        self.shared.wait_stopped(None);
        self.reap_threads();
        self.report()
    }

    pub fn report(&self) -> Option<SchedulerReport> {
        self.shared.lock().report.clone()
    }

    /// The monitor, once the worker has handed it back after stopping.
    pub fn take_monitor(&mut self) -> Option<Monitor> {
        self.shared.lock().monitor.take()
    }

    /// Join helper threads that have already exited; detach the rest.
    fn reap_threads(&mut self) {
        for handle in [self.worker.take(), self.deadline.take()]
            .into_iter()
            .flatten()
        {
            if handle.is_finished() {
                if handle.join().is_err() {
                    error!("scheduler thread panicked");
                }
            } else {
                debug!("detaching scheduler thread still in flight");
            }
        }
    }
}

impl Drop for StateAwareScheduler {
    fn drop(&mut self) {
        if !matches!(
            self.state(),
            SchedulerState::Idle | SchedulerState::Stopped
        ) {
            self.stop();
        }
    }
}

fn run_worker(
    shared: Arc<Shared>,
    config: SchedulerConfig,
    mut monitor: Monitor,
    mut task: MonitoringTask,
    started: Instant,
) {
    let driven = catch_unwind(AssertUnwindSafe(|| {
        drive(&shared, &config, &mut monitor, &mut task, started)
    }));
    let reason = driven.unwrap_or_else(|_| {
        error!("scheduler worker panicked; stopping");
        Some(StopReason::WorkerPanicked)
    });

    if let Some(reason) = reason {
        shared.request_stop(reason);
    }
    shared.run_shutdown_once();
    shared.finish(monitor);
}

/// Tick until a bound is reached or a stop is requested.
///
/// Returns the bound that ended the loop, or `None` when a stop was already
/// recorded by someone else.
fn drive(
    shared: &Shared,
    config: &SchedulerConfig,
    monitor: &mut Monitor,
    task: &mut MonitoringTask,
    started: Instant,
) -> Option<StopReason> {
    // A deadline of `None` lies beyond what `Instant` can represent.
    let iteration_stop = config
        .max_iterations
        .and_then(|max| config.iteration_stop_offset(max))
        .and_then(|offset| started.checked_add(offset));
    let duration_stop = config
        .total_duration
        .and_then(|total| started.checked_add(total));
    let mut next_tick = started.checked_add(config.initial_delay);
    let mut iteration = 0u32;

    let reason = loop {
        let capped = config.max_iterations.is_some_and(|max| iteration >= max);
        let mut wake_at = match iteration_stop {
            Some(at) if capped => Some(at),
            _ => next_tick,
        };
        if let Some(at) = duration_stop {
            wake_at = Some(wake_at.map_or(at, |wake| wake.min(at)));
        }
        if shared.sleep_until(wake_at) {
            break None;
        }
        if duration_stop.is_some_and(|at| Instant::now() >= at) {
            break Some(StopReason::TotalDuration);
        }
        if capped {
            break Some(StopReason::MaxIterations);
        }

        iteration += 1;
        let outcome = run_tick(shared, config, monitor, task, iteration);
        shared.record_tick(outcome);

        let now = Instant::now();
        next_tick = next_tick.and_then(|at| at.checked_add(config.check_interval));
        if next_tick.is_some_and(|at| at < now) {
            debug!(iteration, "tick overran its interval; next tick delayed");
            next_tick = Some(now);
        }
    };
    info!(ticks = iteration, "scheduler stopping");
    reason
}

fn run_deadline(shared: Arc<Shared>, deadline: Instant, grace: Duration) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if shared.wait_stopped(Some(remaining)) {
        return;
    }
    info!("total duration elapsed");
    shared.request_stop(StopReason::TotalDuration);
    if !shared.wait_stopped(Some(grace)) {
        warn!(
            grace_ms = grace.as_millis() as u64,
            "in-flight tick exceeded stop grace period; forcing stop"
        );
        shared.force_stop();
    }
}

/// Run one tick, containing any error or panic at the tick boundary.
fn run_tick(
    shared: &Shared,
    config: &SchedulerConfig,
    monitor: &mut Monitor,
    task: &mut MonitoringTask,
    iteration: u32,
) -> TickOutcome {
    let cancel = shared.cancel.clone();
    let mut task_invoked = false;
    let result = catch_unwind(AssertUnwindSafe(|| {
        tick(
            shared,
            config,
            monitor,
            task,
            iteration,
            &cancel,
            &mut task_invoked,
        )
    }));
    match result {
        Ok(outcome) => outcome,
        Err(_) => {
            error!(iteration, "tick panicked");
            TickOutcome::Panicked { task_invoked }
        }
    }
}

#[instrument(skip_all, fields(iteration))]
fn tick(
    shared: &Shared,
    config: &SchedulerConfig,
    monitor: &mut Monitor,
    task: &mut MonitoringTask,
    iteration: u32,
    cancel: &CancelToken,
    task_invoked: &mut bool,
) -> TickOutcome {
    shared.enter_phase(SchedulerState::Verifying);
    let missing: Vec<String> = monitor
        .active_states()
        .missing(&config.required_states)
        .into_iter()
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        let restored = config.rebuild_on_mismatch && restore_states(monitor, &missing, cancel);
        if !restored {
            if config.skip_if_states_missing {
                info!(?missing, "required states missing; skipping task");
                return TickOutcome::Skipped;
            }
            warn!(?missing, "required states missing; running task anyway");
        }
    }
    if cancel.is_cancelled() {
        return TickOutcome::Cancelled;
    }

    shared.enter_phase(SchedulerState::Running);
    *task_invoked = true;
    let mut ctx = TickContext {
        iteration,
        monitor,
        cancel,
    };
    match task(&mut ctx) {
        Ok(()) => TickOutcome::Ran,
        Err(err) => {
            error!(error = %format!("{:#}", err), "monitoring task failed");
            TickOutcome::TaskFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::region::Region;
    use crate::io::config::SearchSettings;
    use crate::test_support::{RecordingActuator, ScriptedLocator, sample_catalog};
    use crate::verify::startup_verification;
    use std::sync::atomic::{AtomicU32, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    fn monitor(locator: ScriptedLocator) -> Monitor {
        Monitor::new(
            sample_catalog(),
            SearchSettings::default(),
            Box::new(locator),
            Arc::new(RecordingActuator::new()),
        )
    }

    fn fast(max_iterations: Option<u32>) -> SchedulerConfig {
        SchedulerConfig {
            initial_delay: Duration::from_millis(5),
            check_interval: Duration::from_millis(10),
            max_iterations,
            stop_grace: Duration::from_millis(500),
            ..SchedulerConfig::default()
        }
    }

    fn counting(
        runs: &Arc<AtomicU32>,
    ) -> impl FnMut(&mut TickContext<'_>) -> Result<()> + Send + 'static {
        let runs = Arc::clone(runs);
        move |_ctx| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn runs_task_exactly_max_iterations_times() {
        let runs = Arc::new(AtomicU32::new(0));
        let stopped_at = Arc::new(Mutex::new(None));
        let stopped_at_hook = Arc::clone(&stopped_at);
        let config = SchedulerConfig {
            initial_delay: Duration::from_millis(50),
            check_interval: Duration::from_millis(20),
            ..fast(Some(2))
        };
        let mut scheduler =
            StateAwareScheduler::new(config, monitor(ScriptedLocator::new()), counting(&runs))
                .expect("scheduler")
                .with_shutdown_action(move || {
                    *stopped_at_hook.lock().expect("lock") = Some(Instant::now());
                });

        let begin = Instant::now();
        scheduler.start().expect("start");
        let report = scheduler.wait(WAIT).expect("stopped");

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(report.task_runs, 2);
        assert_eq!(report.stop_reason, StopReason::MaxIterations);
        assert!(!report.forced);
        let stopped_at = stopped_at.lock().expect("lock").expect("shutdown ran");
        assert!(stopped_at.duration_since(begin) >= Duration::from_millis(90));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn total_duration_stops_scheduler() {
        let runs = Arc::new(AtomicU32::new(0));
        let config = SchedulerConfig {
            total_duration: Some(Duration::from_millis(80)),
            ..fast(None)
        };
        let mut scheduler =
            StateAwareScheduler::new(config, monitor(ScriptedLocator::new()), counting(&runs))
                .expect("scheduler");

        let begin = Instant::now();
        scheduler.start().expect("start");
        let report = scheduler.wait(WAIT).expect("stopped");

        assert_eq!(report.stop_reason, StopReason::TotalDuration);
        assert!(begin.elapsed() >= Duration::from_millis(80));
        assert!(report.task_runs >= 1);
        assert_eq!(report.task_runs, runs.load(Ordering::SeqCst));
    }

    #[test]
    fn first_reached_cap_wins() {
        let runs = Arc::new(AtomicU32::new(0));
        let config = SchedulerConfig {
            total_duration: Some(Duration::from_secs(30)),
            ..fast(Some(3))
        };
        let mut scheduler =
            StateAwareScheduler::new(config, monitor(ScriptedLocator::new()), counting(&runs))
                .expect("scheduler");

        scheduler.start().expect("start");
        let report = scheduler.wait(WAIT).expect("stopped");

        assert_eq!(report.stop_reason, StopReason::MaxIterations);
        assert_eq!(report.task_runs, 3);
    }

    #[test]
    fn stop_before_first_tick_runs_shutdown_once() {
        let runs = Arc::new(AtomicU32::new(0));
        let cleanups = Arc::new(AtomicU32::new(0));
        let hook = Arc::clone(&cleanups);
        let config = SchedulerConfig {
            initial_delay: Duration::from_secs(60),
            ..fast(None)
        };
        let mut scheduler =
            StateAwareScheduler::new(config, monitor(ScriptedLocator::new()), counting(&runs))
                .expect("scheduler")
                .with_shutdown_action(move || {
                    hook.fetch_add(1, Ordering::SeqCst);
                });

        scheduler.start().expect("start");
        assert!(scheduler.is_running());
        scheduler.stop();
        scheduler.stop();

        assert!(!scheduler.is_running());
        let report = scheduler.report().expect("report");
        assert_eq!(report.stop_reason, StopReason::Requested);
        assert_eq!(report.ticks, 0);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cannot_start_twice_or_restart() {
        let runs = Arc::new(AtomicU32::new(0));
        let mut scheduler = StateAwareScheduler::new(
            SchedulerConfig {
                initial_delay: Duration::from_secs(60),
                ..fast(None)
            },
            monitor(ScriptedLocator::new()),
            counting(&runs),
        )
        .expect("scheduler");

        scheduler.start().expect("start");
        assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyStarted)));
        scheduler.stop();
        assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyStopped)));
    }

    #[test]
    fn failing_and_panicking_ticks_do_not_stop_scheduler() {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);
        let task = move |ctx: &mut TickContext<'_>| -> Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            if ctx.iteration % 2 == 0 {
                panic!("boom on tick {}", ctx.iteration);
            }
            bail!("task error on tick {}", ctx.iteration)
        };
        let mut scheduler =
            StateAwareScheduler::new(fast(Some(4)), monitor(ScriptedLocator::new()), task)
                .expect("scheduler");

        scheduler.start().expect("start");
        let report = scheduler.wait(WAIT).expect("stopped");

        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert_eq!(report.task_runs, 4);
        assert_eq!(report.failed, 4);
        assert_eq!(report.stop_reason, StopReason::MaxIterations);
    }

    #[test]
    fn missing_required_state_skips_task() {
        let runs = Arc::new(AtomicU32::new(0));
        let config = SchedulerConfig {
            required_states: vec!["working".to_string()],
            rebuild_on_mismatch: false,
            ..fast(Some(3))
        };
        let mut scheduler =
            StateAwareScheduler::new(config, monitor(ScriptedLocator::new()), counting(&runs))
                .expect("scheduler");

        scheduler.start().expect("start");
        let report = scheduler.wait(WAIT).expect("stopped");

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.ticks, 3);
    }

    #[test]
    fn missing_required_state_runs_task_when_not_skipping() {
        let runs = Arc::new(AtomicU32::new(0));
        let config = SchedulerConfig {
            required_states: vec!["working".to_string()],
            rebuild_on_mismatch: true,
            skip_if_states_missing: false,
            ..fast(Some(3))
        };
        let mut scheduler =
            StateAwareScheduler::new(config, monitor(ScriptedLocator::new()), counting(&runs))
                .expect("scheduler");

        scheduler.start().expect("start");
        let report = scheduler.wait(WAIT).expect("stopped");

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn rebuild_reaches_required_state_before_task() {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);
        let locator = ScriptedLocator::new().found("prompt", Region::new(100, 600, 80, 30));
        let mut monitor = monitor(locator);
        startup_verification(&mut monitor);
        assert!(monitor.active_states().contains("prompt"));

        let config = SchedulerConfig {
            required_states: vec!["working".to_string()],
            ..fast(Some(2))
        };
        let task = move |ctx: &mut TickContext<'_>| -> Result<()> {
            assert!(ctx.monitor.active_states().contains("working"));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        let mut scheduler = StateAwareScheduler::new(config, monitor, task).expect("scheduler");

        scheduler.start().expect("start");
        let report = scheduler.wait(WAIT).expect("stopped");

        assert_eq!(report.failed, 0);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        let monitor = scheduler.take_monitor().expect("monitor");
        assert!(monitor.active_states().contains("working"));
        assert!(!monitor.active_states().contains("prompt"));
    }

    #[test]
    fn slow_tick_is_forced_after_grace() {
        let cleanups = Arc::new(AtomicU32::new(0));
        let hook = Arc::clone(&cleanups);
        let config = SchedulerConfig {
            initial_delay: Duration::ZERO,
            stop_grace: Duration::from_millis(30),
            ..fast(None)
        };
        let task = |_ctx: &mut TickContext<'_>| -> Result<()> {
            thread::sleep(Duration::from_millis(400));
            Ok(())
        };
        let mut scheduler =
            StateAwareScheduler::new(config, monitor(ScriptedLocator::new()), task)
                .expect("scheduler")
                .with_shutdown_action(move || {
                    hook.fetch_add(1, Ordering::SeqCst);
                });

        scheduler.start().expect("start");
        thread::sleep(Duration::from_millis(50));
        let begin = Instant::now();
        scheduler.stop();

        assert!(begin.elapsed() < Duration::from_millis(300));
        let report = scheduler.report().expect("report");
        assert!(report.forced);
        assert_eq!(report.stop_reason, StopReason::Requested);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);

        // The worker finishing later must not run the shutdown action again.
        thread::sleep(Duration::from_millis(500));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn ticks_never_overlap() {
        let spans = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&spans);
        let task = move |_ctx: &mut TickContext<'_>| -> Result<()> {
            let begin = Instant::now();
            thread::sleep(Duration::from_millis(25));
            recorder.lock().expect("lock").push((begin, Instant::now()));
            Ok(())
        };
        let mut scheduler =
            StateAwareScheduler::new(fast(Some(3)), monitor(ScriptedLocator::new()), task)
                .expect("scheduler");

        scheduler.start().expect("start");
        scheduler.wait(WAIT).expect("stopped");

        let spans = spans.lock().expect("lock");
        assert_eq!(spans.len(), 3);
        for pair in spans.windows(2) {
            assert!(pair[1].0 >= pair[0].1);
        }
    }

    #[test]
    fn rejects_invalid_config() {
        let runs = Arc::new(AtomicU32::new(0));
        let config = SchedulerConfig {
            check_interval: Duration::ZERO,
            required_states: vec!["ghost".to_string()],
            ..SchedulerConfig::default()
        };
        let err =
            StateAwareScheduler::new(config, monitor(ScriptedLocator::new()), counting(&runs))
                .err()
                .expect("invalid");
        let msg = err.to_string();
        assert!(msg.contains("check_interval"));
        assert!(msg.contains("ghost"));
    }

    #[test]
    fn rejects_iteration_cap_beyond_representable_time() {
        let runs = Arc::new(AtomicU32::new(0));
        let config = SchedulerConfig {
            check_interval: Duration::from_millis(u64::MAX),
            max_iterations: Some(u32::MAX),
            ..SchedulerConfig::default()
        };
        let err =
            StateAwareScheduler::new(config, monitor(ScriptedLocator::new()), counting(&runs))
                .err()
                .expect("out of range");
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn huge_interval_still_stops_cleanly() {
        let runs = Arc::new(AtomicU32::new(0));
        let cleanups = Arc::new(AtomicU32::new(0));
        let hook = Arc::clone(&cleanups);
        let config = SchedulerConfig {
            initial_delay: Duration::ZERO,
            check_interval: Duration::from_millis(u64::MAX),
            ..SchedulerConfig::default()
        };
        let mut scheduler =
            StateAwareScheduler::new(config, monitor(ScriptedLocator::new()), counting(&runs))
                .expect("scheduler")
                .with_shutdown_action(move || {
                    hook.fetch_add(1, Ordering::SeqCst);
                });

        scheduler.start().expect("start");
        thread::sleep(Duration::from_millis(30));
        scheduler.stop();

        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        let report = scheduler.report().expect("report");
        assert!(!report.forced);
        assert_eq!(report.stop_reason, StopReason::Requested);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }
}
