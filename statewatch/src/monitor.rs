//! The monitor context: everything a tick reads and mutates.
//!
//! A [`Monitor`] owns the anchor registry and the active-state set, together
//! with the locator and actuator strategies chosen at construction. It is
//! moved into the scheduler's worker so all mutation happens on one thread.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::cancel::CancelToken;
use crate::core::anchors::AnchorRegistry;
use crate::core::catalog::Catalog;
use crate::core::region::Match;
use crate::core::states::{ActiveStateSet, TransitionSpec};
use crate::finder::find_anchor;
use crate::io::actuator::Actuator;
use crate::io::config::{MonitorConfig, SearchSettings};
use crate::io::locator::Locator;
use crate::transition::{TransitionExecutor, TransitionOutcome};

pub struct Monitor {
    catalog: Catalog,
    registry: AnchorRegistry,
    active: ActiveStateSet,
    locator: Box<dyn Locator>,
    actuator: Arc<dyn Actuator>,
    search: SearchSettings,
}

impl Monitor {
    pub fn new(
        catalog: Catalog,
        search: SearchSettings,
        locator: Box<dyn Locator>,
        actuator: Arc<dyn Actuator>,
    ) -> Self {
        let registry = AnchorRegistry::new(catalog.anchors.iter().cloned(), search.history_size);
        Self {
            catalog,
            registry,
            active: ActiveStateSet::new(),
            locator,
            actuator,
            search,
        }
    }

    /// Build from a validated config with the given strategies.
    pub fn from_config(
        config: &MonitorConfig,
        locator: Box<dyn Locator>,
        actuator: Arc<dyn Actuator>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            config.catalog()?,
            config.search.clone(),
            locator,
            actuator,
        ))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn registry(&self) -> &AnchorRegistry {
        &self.registry
    }

    pub fn active_states(&self) -> &ActiveStateSet {
        &self.active
    }

    pub fn active_states_mut(&mut self) -> &mut ActiveStateSet {
        &mut self.active
    }

    pub fn search(&self) -> &SearchSettings {
        &self.search
    }

    /// Locate one anchor, refreshing its derived region first.
    pub fn find(&mut self, anchor_id: &str) -> Result<Option<Match>> {
        find_anchor(
            &mut self.registry,
            self.locator.as_ref(),
            &self.search,
            anchor_id,
        )
    }

    /// Run a transition's steps without touching the active-state set.
    pub fn execute(
        &mut self,
        transition: &TransitionSpec,
        cancel: &CancelToken,
    ) -> TransitionOutcome {
        let executor =
            TransitionExecutor::new(self.locator.as_ref(), self.actuator.as_ref(), &self.search);
        executor.execute(&mut self.registry, transition, cancel)
    }

    /// Run a transition and, on success, move `from` out of and `to` into the
    /// active-state set. On failure the set is left unchanged.
    pub fn perform_transition(
        &mut self,
        transition: &TransitionSpec,
        cancel: &CancelToken,
    ) -> TransitionOutcome {
        let outcome = self.execute(transition, cancel);
        if outcome.is_success() {
            self.active.apply_transition(transition);
            info!(from = %transition.from, to = %transition.to, "transition completed");
        }
        outcome
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("active", &self.active)
            .field("anchors", &self.catalog.anchors.len())
            .field("states", &self.catalog.states.len())
            .finish_non_exhaustive()
    }
}
