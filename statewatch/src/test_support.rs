//! Test-only collaborators and fixtures.
//!
//! Scripted doubles stand in for the screen locator and the input actuator so
//! scheduler, transition and verification logic can run without a display.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::anchors::{AnchorSpec, RegionDependency};
use crate::core::catalog::Catalog;
use crate::core::region::{Adjustment, Match, Region};
use crate::core::states::{ActionKind, ActionTarget, StateSpec, Step, TransitionSpec};
use crate::io::actuator::{ActTarget, Actuator};
use crate::io::locator::{Locator, SearchRequest};

#[derive(Debug, Clone)]
enum Scripted {
    Found(Region),
    Missing,
    Fail(String),
}

#[derive(Debug, Default)]
struct LocatorScript {
    queued: HashMap<String, VecDeque<Scripted>>,
    sticky: HashMap<String, Scripted>,
    requests: Vec<SearchRequest>,
}

/// Locator answering from per-anchor scripts.
///
/// Queued answers are consumed first, then the sticky answer for the anchor
/// applies, and anchors with neither are NotFound. Clones share state so a
/// test can keep a handle after boxing one.
#[derive(Debug, Clone, Default)]
pub struct ScriptedLocator {
    script: Arc<Mutex<LocatorScript>>,
}

impl ScriptedLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always find `anchor` at `region`.
    pub fn found(self, anchor: &str, region: Region) -> Self {
        self.set_sticky(anchor, Scripted::Found(region))
    }

    /// Always fail with a backend error for `anchor`.
    pub fn failing(self, anchor: &str, message: &str) -> Self {
        self.set_sticky(anchor, Scripted::Fail(message.to_string()))
    }

    /// Queue one answer per call for `anchor`; `None` is NotFound.
    pub fn sequence(self, anchor: &str, answers: Vec<Option<Region>>) -> Self {
        {
            let mut script = self.lock();
            let queue = script.queued.entry(anchor.to_string()).or_default();
            queue.extend(answers.into_iter().map(|answer| match answer {
                Some(region) => Scripted::Found(region),
                None => Scripted::Missing,
            }));
        }
        self
    }

    /// Every request received so far, in call order.
    pub fn requests(&self) -> Vec<SearchRequest> {
        self.lock().requests.clone()
    }

    fn set_sticky(self, anchor: &str, answer: Scripted) -> Self {
        self.lock().sticky.insert(anchor.to_string(), answer);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LocatorScript> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Locator for ScriptedLocator {
    fn locate(&self, request: &SearchRequest) -> Result<Option<Match>> {
        let mut script = self.lock();
        script.requests.push(request.clone());
        let queued = script
            .queued
            .get_mut(&request.anchor_id)
            .and_then(VecDeque::pop_front);
        let answer = queued
            .or_else(|| script.sticky.get(&request.anchor_id).cloned())
            .unwrap_or(Scripted::Missing);
        match answer {
            Scripted::Found(region) => Ok(Some(Match::new(&request.anchor_id, region, 0.95))),
            Scripted::Missing => Ok(None),
            Scripted::Fail(message) => Err(anyhow!(message)),
        }
    }
}

/// Actuator that records every action. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingActuator {
    actions: Arc<Mutex<Vec<(ActionKind, ActTarget)>>>,
    fail_on: Option<ActionKind>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail (without recording) every action of kind `action`.
    pub fn failing_on(mut self, action: ActionKind) -> Self {
        self.fail_on = Some(action);
        self
    }

    pub fn actions(&self) -> Vec<(ActionKind, ActTarget)> {
        self.actions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Actuator for RecordingActuator {
    fn act(&self, action: ActionKind, target: &ActTarget) -> Result<()> {
        if self.fail_on == Some(action) {
            return Err(anyhow!("{} rejected by input backend", action));
        }
        self.actions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((action, target.clone()));
        Ok(())
    }
}

/// Two-state catalog: "prompt" (initial) and "working".
///
/// - `prompt` anchor: static region covering the lower-left quarter of 1920x1080
/// - `send` anchor: belongs to prompt, searched on the whole screen
/// - `icon` anchor: derived from the prompt match with `(3, 10, 30, 55)`
/// - transition prompt -> working: locate prompt, click it
pub fn sample_catalog() -> Catalog {
    Catalog {
        anchors: vec![
            AnchorSpec::new("prompt", "prompt").with_region(Region::new(0, 540, 960, 540)),
            AnchorSpec::new("send", "prompt"),
            AnchorSpec::new("icon", "working").with_dependency(RegionDependency {
                target_state: "prompt".to_string(),
                target_anchor: "prompt".to_string(),
                adjustment: Adjustment {
                    dx: 3,
                    dy: 10,
                    dw: 30,
                    dh: 55,
                },
            }),
        ],
        states: vec![
            StateSpec::new("prompt", &["prompt"]).initial(),
            StateSpec::new("working", &["icon"]),
        ],
        transitions: vec![TransitionSpec::new(
            "prompt",
            "working",
            vec![
                Step::locate("prompt"),
                Step::act(ActionKind::Click, ActionTarget::LastLocatedRegion),
            ],
        )],
    }
}

/// Temporary directory holding a config file and optional fixtures.
pub struct TempProject {
    dir: TempDir,
}

impl TempProject {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().context("create tempdir")?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `name` inside the project and return its path.
    pub fn write(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}
