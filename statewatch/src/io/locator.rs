//! Locator abstraction for finding anchors on screen.
//!
//! The [`Locator`] trait decouples the monitor from the pattern-matching
//! backend. Two strategies exist: a live screen search supplied by the host,
//! and [`ReplayLocator`], which answers from recorded fixtures. The strategy
//! is chosen once, when the monitor is built, by [`select_locator`].

use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::region::{Match, Region};
use crate::io::replay::ReplayEngine;

/// Whether anchors are searched on the real screen or replayed from fixtures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Live,
    Replay,
}

/// Parameters for a single locate call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub anchor_id: String,
    /// Region to search. `None` means the whole screen.
    pub region: Option<Region>,
    /// Minimum similarity score in `[0, 1]`.
    pub similarity: f64,
    /// Upper bound on how long the search may take.
    pub max_duration: Duration,
}

/// Abstraction over anchor search backends.
///
/// Called only from the scheduler worker (or the startup sequence) and may
/// block up to `request.max_duration`.
pub trait Locator: Send {
    /// `Ok(Some(_))` when found, `Ok(None)` when the anchor is not visible.
    /// `Err` is reserved for backend failures.
    fn locate(&self, request: &SearchRequest) -> Result<Option<Match>>;
}

/// Locator that replays recorded matches instead of searching the screen.
pub struct ReplayLocator {
    engine: ReplayEngine,
}

impl ReplayLocator {
    pub fn new(engine: ReplayEngine) -> Self {
        Self { engine }
    }
}

impl Locator for ReplayLocator {
    #[instrument(skip_all, fields(anchor = %request.anchor_id))]
    fn locate(&self, request: &SearchRequest) -> Result<Option<Match>> {
        let found = self.engine.try_replay(&request.anchor_id);
        debug!(found = found.is_some(), "replayed locate");
        Ok(found)
    }
}

/// Pick the locator strategy for `mode`.
///
/// In live mode the replay engine is dropped unused; in replay mode the live
/// locator is never consulted.
pub fn select_locator(
    mode: Mode,
    live: Option<Box<dyn Locator>>,
    replay: Option<ReplayEngine>,
) -> Result<Box<dyn Locator>> {
    match mode {
        Mode::Live => live.ok_or_else(|| anyhow!("live mode requires a screen locator")),
        Mode::Replay => replay
            .map(|engine| Box::new(ReplayLocator::new(engine)) as Box<dyn Locator>)
            .ok_or_else(|| anyhow!("replay mode requires fixtures")),
    }
}
