//! Scheduler behaviour when the screen changes between ticks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use statewatch::core::region::Region;
use statewatch::io::config::SearchSettings;
use statewatch::monitor::Monitor;
use statewatch::scheduler::{SchedulerConfig, StateAwareScheduler, TickContext};
use statewatch::test_support::{RecordingActuator, ScriptedLocator, sample_catalog};
use statewatch::verify::{startup_verification, verify_all};

fn fast_config(required: &[&str], max_iterations: u32) -> SchedulerConfig {
    SchedulerConfig {
        initial_delay: Duration::from_millis(5),
        check_interval: Duration::from_millis(10),
        max_iterations: Some(max_iterations),
        required_states: required.iter().map(|s| s.to_string()).collect(),
        rebuild_on_mismatch: false,
        ..SchedulerConfig::default()
    }
}

/// Prompt is visible for startup and the first tick, then disappears.
///
/// ```text
/// startup  prompt found      -> active
/// tick 1   task runs, verify -> still active
/// tick 2   task runs, verify -> lost
/// tick 3   skipped
/// tick 4   skipped
/// ```
#[test]
fn task_is_skipped_once_required_state_disappears() {
    let seen = Region::new(100, 600, 80, 30);
    let locator =
        ScriptedLocator::new().sequence("prompt", vec![Some(seen), Some(seen), None]);
    let mut monitor = Monitor::new(
        sample_catalog(),
        SearchSettings::default(),
        Box::new(locator.clone()),
        Arc::new(RecordingActuator::new()),
    );
    startup_verification(&mut monitor);
    assert!(monitor.active_states().contains("prompt"));

    let runs = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&runs);
    let task = move |ctx: &mut TickContext<'_>| -> anyhow::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        verify_all(ctx.monitor, ctx.cancel);
        Ok(())
    };
    let mut scheduler =
        StateAwareScheduler::new(fast_config(&["prompt"], 4), monitor, task).expect("scheduler");
    scheduler.start().expect("start");
    let report = scheduler.wait(Duration::from_secs(5)).expect("stopped");

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(report.task_runs, 2);
    assert_eq!(report.skipped, 2);
    let prompt_searches = locator
        .requests()
        .iter()
        .filter(|request| request.anchor_id == "prompt")
        .count();
    assert_eq!(prompt_searches, 3);
}

#[test]
fn shutdown_action_runs_when_scheduler_is_dropped() {
    let cleanups = Arc::new(AtomicU32::new(0));
    let hook = Arc::clone(&cleanups);
    let monitor = Monitor::new(
        sample_catalog(),
        SearchSettings::default(),
        Box::new(ScriptedLocator::new()),
        Arc::new(RecordingActuator::new()),
    );
    let config = SchedulerConfig {
        initial_delay: Duration::from_secs(60),
        ..SchedulerConfig::default()
    };
    let mut scheduler =
        StateAwareScheduler::new(config, monitor, |_ctx: &mut TickContext<'_>| Ok(()))
            .expect("scheduler")
            .with_shutdown_action(move || {
                hook.fetch_add(1, Ordering::SeqCst);
            });
    scheduler.start().expect("start");
    drop(scheduler);

    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}
