//! Monitor configuration stored as TOML (conventionally `statewatch.toml`).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::core::anchors::{AnchorSpec, DEFAULT_HISTORY_SIZE, RegionDependency, RegionSource};
use crate::core::catalog::{Catalog, validate_catalog, validate_required_states};
use crate::core::region::{Adjustment, Location, Region};
use crate::core::states::{ActivationRule, StateSpec, TransitionSpec};
use crate::io::locator::Mode;
use crate::io::replay::{CERTAIN, ReplayEngine};
use crate::scheduler::SchedulerConfig;

/// Monitor configuration (TOML).
///
/// Scalar fields come first so the serialised document keeps them above the
/// tables. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub mode: Mode,

    /// Replay fixtures (JSON). Relative paths resolve against the config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixtures: Option<PathBuf>,

    pub scheduler: SchedulerSettings,
    pub search: SearchSettings,
    pub replay: ReplaySettings,
    pub shutdown: ShutdownSettings,

    pub anchors: Vec<AnchorConfig>,
    pub states: Vec<StateSpec>,
    pub transitions: Vec<TransitionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Delay before the first tick.
    pub initial_delay_ms: u64,
    /// Period between tick starts.
    pub check_interval_ms: u64,
    /// Stop after this many ticks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    /// Stop once this much time has elapsed since start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<u64>,
    /// States that must be active before the monitoring task runs.
    pub required_states: Vec<String>,
    /// Try to reach missing required states through declared transitions.
    pub rebuild_on_mismatch: bool,
    /// Skip the task when required states cannot be restored.
    pub skip_if_states_missing: bool,
    /// How long `stop` waits for an in-flight tick before forcing shutdown.
    pub stop_grace_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 0,
            check_interval_ms: 1_000,
            max_iterations: None,
            total_duration_ms: None,
            required_states: Vec::new(),
            rebuild_on_mismatch: true,
            skip_if_states_missing: true,
            stop_grace_ms: 2_000,
        }
    }
}

impl SchedulerSettings {
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            check_interval: Duration::from_millis(self.check_interval_ms),
            max_iterations: self.max_iterations,
            total_duration: self.total_duration_ms.map(Duration::from_millis),
            required_states: self.required_states.clone(),
            rebuild_on_mismatch: self.rebuild_on_mismatch,
            skip_if_states_missing: self.skip_if_states_missing,
            stop_grace: Duration::from_millis(self.stop_grace_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchSettings {
    /// Minimum similarity score accepted by the locator.
    pub similarity: f64,
    /// Upper bound for a single locate call.
    pub max_search_ms: u64,
    /// Matches retained per anchor.
    pub history_size: usize,
    /// Consecutive misses logged at debug before escalating to warn.
    pub miss_log_threshold: u32,
    pub activation: ActivationRule,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            similarity: 0.7,
            max_search_ms: 3_000,
            history_size: DEFAULT_HISTORY_SIZE,
            miss_log_threshold: 10,
            activation: ActivationRule::Any,
        }
    }
}

impl SearchSettings {
    pub fn max_search(&self) -> Duration {
        Duration::from_millis(self.max_search_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReplaySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Match probability (percent) for anchors not listed in `probabilities`.
    pub default_probability: u8,
    pub probabilities: BTreeMap<String, u8>,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            seed: None,
            default_probability: CERTAIN,
            probabilities: BTreeMap::new(),
        }
    }
}

impl ReplaySettings {
    /// Apply seed and probabilities to a freshly built engine.
    pub fn configure(&self, engine: ReplayEngine) -> ReplayEngine {
        let mut engine = engine.with_default_probability(self.default_probability);
        if let Some(seed) = self.seed {
            engine = engine.with_seed(seed);
        }
        for (anchor, percent) in &self.probabilities {
            engine = engine.with_probability(anchor.clone(), *percent);
        }
        engine
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShutdownSettings {
    /// Move the pointer to `neutral` when the scheduler stops.
    pub park_pointer: bool,
    pub neutral: Location,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            park_pointer: true,
            neutral: Location::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnchorConfig {
    pub id: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependencyConfig>,
    #[serde(default)]
    pub fixed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyConfig {
    pub state: String,
    pub anchor: String,
    #[serde(default)]
    pub dx: i32,
    #[serde(default)]
    pub dy: i32,
    #[serde(default)]
    pub dw: i32,
    #[serde(default)]
    pub dh: i32,
}

impl AnchorConfig {
    pub fn to_spec(&self) -> Result<AnchorSpec> {
        let source = match (&self.region, &self.depends_on) {
            (Some(_), Some(_)) => {
                bail!(
                    "anchor '{}': region and depends_on are mutually exclusive",
                    self.id
                )
            }
            (Some(region), None) => RegionSource::Static(*region),
            (None, Some(dep)) => RegionSource::Dependent(RegionDependency {
                target_state: dep.state.clone(),
                target_anchor: dep.anchor.clone(),
                adjustment: Adjustment {
                    dx: dep.dx,
                    dy: dep.dy,
                    dw: dep.dw,
                    dh: dep.dh,
                },
            }),
            (None, None) => RegionSource::Whole,
        };
        Ok(AnchorSpec {
            id: self.id.clone(),
            state: self.state.clone(),
            source,
            fixed: self.fixed,
        })
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Live,
            fixtures: None,
            scheduler: SchedulerSettings::default(),
            search: SearchSettings::default(),
            replay: ReplaySettings::default(),
            shutdown: ShutdownSettings::default(),
            anchors: Vec::new(),
            states: Vec::new(),
            transitions: Vec::new(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        let mut errors = self.setting_errors();
        match self.anchor_specs() {
            Ok(anchors) => {
                let catalog = Catalog {
                    anchors,
                    states: self.states.clone(),
                    transitions: self.transitions.clone(),
                };
                errors.extend(validate_catalog(&catalog));
                errors.extend(validate_required_states(
                    &catalog,
                    &self.scheduler.required_states,
                ));
            }
            Err(err) => errors.push(err.to_string()),
        }
        if !errors.is_empty() {
            bail!("invalid config:\n- {}", errors.join("\n- "));
        }
        Ok(())
    }

    /// Registration table built from the `[[anchors]]`, `[[states]]` and
    /// `[[transitions]]` sections.
    pub fn catalog(&self) -> Result<Catalog> {
        Catalog::new(
            self.anchor_specs()?,
            self.states.clone(),
            self.transitions.clone(),
        )
    }

    /// Fixtures path resolved against the directory holding the config file.
    pub fn fixtures_path(&self, config_path: &Path) -> Option<PathBuf> {
        let fixtures = self.fixtures.as_ref()?;
        if fixtures.is_absolute() {
            return Some(fixtures.clone());
        }
        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        Some(base.join(fixtures))
    }

    fn anchor_specs(&self) -> Result<Vec<AnchorSpec>> {
        self.anchors.iter().map(AnchorConfig::to_spec).collect()
    }

    fn setting_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.scheduler.check_interval_ms == 0 {
            errors.push("scheduler.check_interval_ms must be > 0".to_string());
        }
        if self.scheduler.total_duration_ms == Some(0) {
            errors.push("scheduler.total_duration_ms must be > 0 when set".to_string());
        }
        errors.extend(
            self.scheduler
                .to_scheduler_config()
                .range_errors()
                .into_iter()
                .map(|err| format!("scheduler: {}", err)),
        );
        if !(0.0..=1.0).contains(&self.search.similarity) {
            errors.push("search.similarity must be within [0, 1]".to_string());
        }
        if self.search.max_search_ms == 0 {
            errors.push("search.max_search_ms must be > 0".to_string());
        }
        if self.search.history_size == 0 {
            errors.push("search.history_size must be > 0".to_string());
        }
        if self.replay.default_probability > CERTAIN {
            errors.push("replay.default_probability must be within 0..=100".to_string());
        }
        for (anchor, percent) in &self.replay.probabilities {
            if *percent > CERTAIN {
                errors.push(format!(
                    "replay.probabilities.{} must be within 0..=100",
                    anchor
                ));
            }
        }
        if self.mode == Mode::Replay && self.fixtures.is_none() {
            errors.push("replay mode requires `fixtures`".to_string());
        }
        errors
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `MonitorConfig::default()`.
pub fn load_config(path: &Path) -> Result<MonitorConfig> {
    if !path.exists() {
        let cfg = MonitorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: MonitorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &MonitorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::states::{ActionKind, ActionTarget, Step};

    const SAMPLE: &str = r#"
mode = "replay"
fixtures = "fixtures.json"

[scheduler]
initial_delay_ms = 5000
check_interval_ms = 2000
max_iterations = 2
required_states = ["prompt"]

[search]
activation = "all"

[replay]
seed = 42

[replay.probabilities]
icon = 100

[[anchors]]
id = "prompt"
state = "prompt"
region = { x = 0, y = 540, width = 960, height = 540 }

[[anchors]]
id = "icon"
state = "working"
fixed = true
depends_on = { state = "prompt", anchor = "prompt", dx = 3, dy = 10, dw = 30, dh = 55 }

[[states]]
id = "prompt"
name = "Prompt"
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
  { step = "act", action = "type", target = { text = "continue" } },
]
"#;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, MonitorConfig::default());
    }

    #[test]
    fn parses_full_document() {
        let cfg: MonitorConfig = toml::from_str(SAMPLE).expect("parse");
        cfg.validate().expect("valid");
        assert_eq!(cfg.mode, Mode::Replay);
        assert_eq!(cfg.scheduler.max_iterations, Some(2));
        assert_eq!(cfg.search.activation, ActivationRule::All);
        assert_eq!(cfg.search.history_size, DEFAULT_HISTORY_SIZE);

        let catalog = cfg.catalog().expect("catalog");
        let icon = catalog.anchor("icon").expect("icon");
        assert!(icon.fixed);
        assert_eq!(
            icon.dependency().map(|dep| dep.adjustment),
            Some(Adjustment {
                dx: 3,
                dy: 10,
                dw: 30,
                dh: 55
            })
        );
        assert_eq!(
            catalog.transitions[0].steps[2],
            Step::act(ActionKind::Type, ActionTarget::Text("continue".to_string()))
        );
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("statewatch.toml");
        let cfg: MonitorConfig = toml::from_str(SAMPLE).expect("parse");
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn rejects_region_and_dependency_together() {
        let mut cfg: MonitorConfig = toml::from_str(SAMPLE).expect("parse");
        cfg.anchors[1].region = Some(Region::new(0, 0, 10, 10));
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn rejects_bad_settings_and_unknown_required_state() {
        let mut cfg: MonitorConfig = toml::from_str(SAMPLE).expect("parse");
        cfg.scheduler.check_interval_ms = 0;
        cfg.search.similarity = 1.5;
        cfg.replay.probabilities.insert("prompt".to_string(), 101);
        cfg.scheduler.required_states.push("ghost".to_string());
        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("check_interval_ms"));
        assert!(msg.contains("similarity"));
        assert!(msg.contains("replay.probabilities.prompt"));
        assert!(msg.contains("required state 'ghost'"));
    }

    #[test]
    fn rejects_schedule_beyond_representable_time() {
        let mut cfg: MonitorConfig = toml::from_str(SAMPLE).expect("parse");
        cfg.scheduler.check_interval_ms = u64::MAX;
        cfg.scheduler.max_iterations = Some(u32::MAX);
        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("scheduler: max_iterations"));
    }

    #[test]
    fn fixtures_path_is_relative_to_config() {
        let cfg: MonitorConfig = toml::from_str(SAMPLE).expect("parse");
        assert_eq!(
            cfg.fixtures_path(Path::new("/etc/statewatch/statewatch.toml")),
            Some(PathBuf::from("/etc/statewatch/fixtures.json"))
        );
    }

    #[test]
    fn scheduler_settings_convert_to_durations() {
        let cfg: MonitorConfig = toml::from_str(SAMPLE).expect("parse");
        let sched = cfg.scheduler.to_scheduler_config();
        assert_eq!(sched.initial_delay, Duration::from_secs(5));
        assert_eq!(sched.check_interval, Duration::from_secs(2));
        assert_eq!(sched.total_duration, None);
    }
}
