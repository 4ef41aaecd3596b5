//! `statewatch run`: wire config, locator, actuator and scheduler together.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{info, instrument, warn};

use crate::io::actuator::{Actuator, park_pointer};
use crate::io::config::{MonitorConfig, load_config};
use crate::io::fixtures::{load_fixtures, unknown_anchors};
use crate::io::locator::{Locator, Mode, select_locator};
use crate::io::replay::ReplayEngine;
use crate::monitor::Monitor;
use crate::scheduler::{SchedulerReport, StateAwareScheduler, TickContext};
use crate::verify::{VerifyReport, startup_verification, verify_all};

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub max_iterations: Option<u32>,
    pub total_duration: Option<Duration>,
    pub seed: Option<u64>,
}

impl RunOptions {
    fn apply(&self, config: &mut MonitorConfig) {
        if let Some(max) = self.max_iterations {
            config.scheduler.max_iterations = Some(max);
        }
        if let Some(total) = self.total_duration {
            config.scheduler.total_duration_ms = Some(total.as_millis() as u64);
        }
        if let Some(seed) = self.seed {
            config.replay.seed = Some(seed);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub startup: VerifyReport,
    pub report: SchedulerReport,
    /// Active states once the scheduler handed the monitor back.
    pub active_states: Option<Vec<String>>,
}

/// Build the monitor for `config`, choosing the locator strategy once.
///
/// Live mode needs a platform screen locator, which this build does not ship;
/// it is rejected here rather than at the first search.
pub fn build_monitor(
    config: &MonitorConfig,
    config_path: &Path,
    actuator: Arc<dyn Actuator>,
) -> Result<Monitor> {
    let catalog = config.catalog()?;
    let replay = match config.mode {
        Mode::Replay => {
            let Some(path) = config.fixtures_path(config_path) else {
                bail!("replay mode requires `fixtures`");
            };
            let fixtures =
                load_fixtures(&path).with_context(|| format!("load {}", path.display()))?;
            for anchor in unknown_anchors(&fixtures, &catalog) {
                warn!(anchor = %anchor, "fixtures reference an undeclared anchor");
            }
            Some(config.replay.configure(ReplayEngine::new(fixtures)))
        }
        Mode::Live => None,
    };
    let live: Option<Box<dyn Locator>> = None;
    let locator = select_locator(config.mode, live, replay)?;
    Monitor::from_config(config, locator, actuator)
}

/// Load `config_path`, verify the starting states and run the scheduler to
/// completion.
///
/// Each tick re-verifies every declared state and logs the active set.
#[instrument(skip_all, fields(config = %config_path.display()))]
pub fn run_monitor(
    config_path: &Path,
    options: &RunOptions,
    actuator: Arc<dyn Actuator>,
) -> Result<RunOutcome> {
    if !config_path.is_file() {
        bail!("missing config file {}", config_path.display());
    }
    let mut config = load_config(config_path)
        .with_context(|| format!("load {}", config_path.display()))?;
    options.apply(&mut config);
    config.validate()?;

    let mut monitor = build_monitor(&config, config_path, Arc::clone(&actuator))?;
    let startup = startup_verification(&mut monitor);

    let task = |ctx: &mut TickContext<'_>| -> Result<()> {
        let pass = verify_all(ctx.monitor, ctx.cancel);
        info!(
            iteration = ctx.iteration,
            active = ?ctx.monitor.active_states().iter().collect::<Vec<_>>(),
            cancelled = pass.cancelled,
            "monitoring pass"
        );
        Ok(())
    };
    let mut scheduler =
        StateAwareScheduler::new(config.scheduler.to_scheduler_config(), monitor, task)?;
    if config.shutdown.park_pointer {
        let neutral = config.shutdown.neutral;
        scheduler = scheduler.with_shutdown_action(move || {
            if let Err(err) = park_pointer(actuator.as_ref(), neutral) {
                warn!(error = %format!("{:#}", err), "failed to park pointer");
            }
        });
    }

    scheduler.start()?;
    let report = scheduler
        .join()
        .context("scheduler stopped without a report")?;
    let active_states = scheduler.take_monitor().map(|monitor| {
        monitor
            .active_states()
            .iter()
            .map(str::to_string)
            .collect()
    });
    Ok(RunOutcome {
        startup,
        report,
        active_states,
    })
}
