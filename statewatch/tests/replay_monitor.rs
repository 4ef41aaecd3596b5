//! End-to-end replay scenarios: config + fixtures on disk, replay locator,
//! region resolution and state rebuilding through the scheduler.

use std::sync::Arc;
use std::time::Duration;

use statewatch::core::region::Region;
use statewatch::core::states::ActionKind;
use statewatch::io::actuator::ActTarget;
use statewatch::io::config::load_config;
use statewatch::run::build_monitor;
use statewatch::scheduler::{StateAwareScheduler, StopReason, TickContext};
use statewatch::test_support::{RecordingActuator, TempProject};
use statewatch::verify::startup_verification;

const CONFIG: &str = r#"
mode = "replay"
fixtures = "fixtures.json"

[scheduler]
initial_delay_ms = 5
check_interval_ms = 10
max_iterations = 2
required_states = ["working"]

[replay]
seed = 7

[[anchors]]
id = "prompt"
state = "prompt"
region = { x = 0, y = 540, width = 960, height = 540 }

[[anchors]]
id = "icon"
state = "working"
depends_on = { state = "prompt", anchor = "prompt", dx = 3, dy = 10, dw = 30, dh = 55 }

[[states]]
id = "prompt"
anchors = ["prompt"]
initial = true

[[states]]
id = "working"
anchors = ["icon"]

[[transitions]]
from = "prompt"
to = "working"
steps = [
  { step = "locate", anchor = "prompt" },
  { step = "act", action = "click" },
]
"#;

const PROMPT_FOUND: &str =
    r#"{"succeeded": true, "match": {"region": {"x": 100, "y": 600, "width": 80, "height": 30}}}"#;

fn project(icon_records: &str) -> (TempProject, std::path::PathBuf) {
    let project = TempProject::new().expect("project");
    let config = project.write("statewatch.toml", CONFIG).expect("config");
    let fixtures = format!(
        r#"{{"anchors": {{"prompt": [{}], "icon": [{}]}}}}"#,
        PROMPT_FOUND, icon_records
    );
    project.write("fixtures.json", &fixtures).expect("fixtures");
    (project, config)
}

#[test]
fn dependent_anchor_searches_derived_region() {
    let (_project, path) = project(
        r#"{"succeeded": true, "match": {"region": {"x": 120, "y": 620, "width": 40, "height": 40}, "score": 0.9}}"#,
    );
    let config = load_config(&path).expect("config");
    let mut monitor =
        build_monitor(&config, &path, Arc::new(RecordingActuator::new())).expect("monitor");

    let report = startup_verification(&mut monitor);

    assert_eq!(report.active, vec!["prompt", "working"]);
    assert_eq!(
        monitor.registry().search_region("icon"),
        Some(Region::new(103, 610, 110, 85))
    );
    let icon = monitor.registry().last_match("icon").expect("icon match");
    assert_eq!(icon.score(), 0.9);
}

#[test]
fn scheduler_rebuilds_required_state_through_transition() {
    let (_project, path) = project(r#"{"succeeded": false}"#);
    let config = load_config(&path).expect("config");
    let actuator = RecordingActuator::new();
    let mut monitor =
        build_monitor(&config, &path, Arc::new(actuator.clone())).expect("monitor");
    let startup = startup_verification(&mut monitor);
    assert_eq!(startup.active, vec!["prompt"]);
    assert_eq!(startup.inactive, vec!["working"]);

    let iterations = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = Arc::clone(&iterations);
    let task = move |ctx: &mut TickContext<'_>| -> anyhow::Result<()> {
        seen.lock().expect("lock").push(ctx.iteration);
        Ok(())
    };
    let mut scheduler =
        StateAwareScheduler::new(config.scheduler.to_scheduler_config(), monitor, task)
            .expect("scheduler");
    scheduler.start().expect("start");
    let report = scheduler.wait(Duration::from_secs(5)).expect("stopped");

    assert_eq!(report.stop_reason, StopReason::MaxIterations);
    assert_eq!(report.skipped, 0);
    assert_eq!(*iterations.lock().expect("lock"), vec![1, 2]);
    assert_eq!(
        actuator.actions(),
        vec![(
            ActionKind::Click,
            ActTarget::Region(Region::new(100, 600, 80, 30))
        )]
    );
    let monitor = scheduler.take_monitor().expect("monitor");
    assert!(monitor.active_states().contains("working"));
    assert!(!monitor.active_states().contains("prompt"));
}
