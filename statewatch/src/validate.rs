//! `statewatch validate`: check a config file, its catalog and its fixtures.

use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::warn;

use crate::io::config::load_config;
use crate::io::fixtures::{load_fixtures, unknown_anchors};
use crate::io::locator::Mode;

/// What a successful validation found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub mode: Mode,
    pub anchors: usize,
    pub states: usize,
    pub transitions: usize,
    /// Anchors with recorded histories, when a fixtures file is configured.
    pub fixture_anchors: Option<usize>,
    /// Fixture histories for anchors the catalog does not declare.
    pub unknown_fixture_anchors: Vec<String>,
}

/// Load and validate `config_path`, then the fixtures file it points at.
///
/// Unknown fixture anchors are reported but are not an error; the replay
/// engine never consults them.
pub fn validate_project(config_path: &Path) -> Result<ValidateOutcome> {
    if !config_path.is_file() {
        bail!("missing config file {}", config_path.display());
    }
    let config = load_config(config_path)
        .with_context(|| format!("load {}", config_path.display()))?;
    let catalog = config.catalog()?;

    let mut outcome = ValidateOutcome {
        mode: config.mode,
        anchors: catalog.anchors.len(),
        states: catalog.states.len(),
        transitions: catalog.transitions.len(),
        fixture_anchors: None,
        unknown_fixture_anchors: Vec::new(),
    };

    if let Some(path) = config.fixtures_path(config_path) {
        let fixtures = load_fixtures(&path).with_context(|| format!("load {}", path.display()))?;
        outcome.fixture_anchors = Some(fixtures.len());
        let unknown: Vec<String> = unknown_anchors(&fixtures, &catalog)
            .into_iter()
            .map(str::to_string)
            .collect();
        for anchor in &unknown {
            warn!(anchor = %anchor, "fixtures reference an undeclared anchor");
        }
        outcome.unknown_fixture_anchors = unknown;
    }
    Ok(outcome)
}
