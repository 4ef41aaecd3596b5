//! Ordered locate/act execution for a single transition.
//!
//! Execution is fail-fast: the first failing step ends the attempt and later
//! steps never run. The executor only records matches in the registry; it
//! never touches the active-state set, which the caller updates on success.

use tracing::{debug, error, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::anchors::AnchorRegistry;
use crate::core::region::Region;
use crate::core::states::{ActionKind, ActionTarget, Step, TransitionSpec};
use crate::finder::find_anchor;
use crate::io::actuator::{ActTarget, Actuator};
use crate::io::config::SearchSettings;
use crate::io::locator::Locator;

/// Why a step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFailure {
    /// The anchor is not visible right now. Expected; retry next cycle.
    NotFound { anchor: String },
    /// The locator backend returned an error.
    LocateError { anchor: String, message: String },
    /// An act on `last-located-region` ran with no prior successful locate.
    NoLocatedRegion,
    /// The actuator reported a failure at the input level.
    ActionFailed { action: ActionKind, message: String },
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepFailure::NotFound { anchor } => write!(f, "anchor '{}' not found", anchor),
            StepFailure::LocateError { anchor, message } => {
                write!(f, "locating '{}' failed: {}", anchor, message)
            }
            StepFailure::NoLocatedRegion => {
                f.write_str("last-located-region used before any successful locate")
            }
            StepFailure::ActionFailed { action, message } => {
                write!(f, "{} failed: {}", action, message)
            }
        }
    }
}

/// Result of executing a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Succeeded,
    Failed { step: usize, failure: StepFailure },
    /// A stop was requested before `step` started.
    Cancelled { step: usize },
}

impl TransitionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionOutcome::Succeeded)
    }
}

/// Runs transition steps against the locate and act collaborators.
pub struct TransitionExecutor<'a> {
    locator: &'a dyn Locator,
    actuator: &'a dyn Actuator,
    search: &'a SearchSettings,
}

impl<'a> TransitionExecutor<'a> {
    pub fn new(
        locator: &'a dyn Locator,
        actuator: &'a dyn Actuator,
        search: &'a SearchSettings,
    ) -> Self {
        Self {
            locator,
            actuator,
            search,
        }
    }

    /// Execute `transition.steps` in order.
    ///
    /// The stop signal is checked before each step, never in the middle of one.
    #[instrument(skip_all, fields(from = %transition.from, to = %transition.to))]
    pub fn execute(
        &self,
        registry: &mut AnchorRegistry,
        transition: &TransitionSpec,
        cancel: &CancelToken,
    ) -> TransitionOutcome {
        let mut last_located: Option<Region> = None;

        for (index, step) in transition.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!(step = index, "transition cancelled");
                return TransitionOutcome::Cancelled { step: index };
            }
            let result = match step {
                Step::Locate { anchor } => self.locate(registry, anchor).map(|region| {
                    last_located = Some(region);
                }),
                Step::Act { action, target } => self.act(*action, target, last_located),
            };
            if let Err(failure) = result {
                match failure {
                    StepFailure::NotFound { .. } => debug!(step = index, %failure, "step failed"),
                    StepFailure::NoLocatedRegion => {
                        error!(step = index, %failure, "transition misconfigured");
                    }
                    _ => warn!(step = index, %failure, "step failed"),
                }
                return TransitionOutcome::Failed {
                    step: index,
                    failure,
                };
            }
        }
        TransitionOutcome::Succeeded
    }

    fn locate(&self, registry: &mut AnchorRegistry, anchor: &str) -> Result<Region, StepFailure> {
        match find_anchor(registry, self.locator, self.search, anchor) {
            Ok(Some(found)) => Ok(found.region()),
            Ok(None) => Err(StepFailure::NotFound {
                anchor: anchor.to_string(),
            }),
            Err(err) => Err(StepFailure::LocateError {
                anchor: anchor.to_string(),
                message: format!("{:#}", err),
            }),
        }
    }

    fn act(
        &self,
        action: ActionKind,
        target: &ActionTarget,
        last_located: Option<Region>,
    ) -> Result<(), StepFailure> {
        let operand = match target {
            ActionTarget::LastLocatedRegion => {
                ActTarget::Region(last_located.ok_or(StepFailure::NoLocatedRegion)?)
            }
            ActionTarget::Region(region) => ActTarget::Region(*region),
            ActionTarget::Location(location) => ActTarget::Location(*location),
            ActionTarget::Text(text) => ActTarget::Text(text.clone()),
        };
        self.actuator
            .act(action, &operand)
            .map_err(|err| StepFailure::ActionFailed {
                action,
                message: format!("{:#}", err),
            })
    }
}
