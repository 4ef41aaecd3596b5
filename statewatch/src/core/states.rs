//! States, transitions and the set of currently active states.
//!
//! These are plain data. Nothing here performs a search or an action; the
//! [`crate::transition`] and [`crate::verify`] modules drive them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::region::{Location, Region};

/// A named mode of the monitored application, detected through its anchors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSpec {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Anchors whose presence indicates the state is active.
    #[serde(default)]
    pub anchors: Vec<String>,
    /// Activated at startup when verification finds no active state.
    #[serde(default)]
    pub initial: bool,
}

impl StateSpec {
    pub fn new(id: impl Into<String>, anchors: &[&str]) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            anchors: anchors.iter().map(|a| (*a).to_string()).collect(),
            initial: false,
        }
    }

    pub fn initial(mut self) -> Self {
        self.initial = true;
        self
    }

    /// Display name, falling back to the id.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// How many required anchors must match for a state to count as active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationRule {
    #[default]
    Any,
    All,
}

/// Input action performed by an `Act` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Click,
    Type,
    Highlight,
    Move,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Highlight => "highlight",
            ActionKind::Move => "move",
        };
        f.write_str(name)
    }
}

/// What an `Act` step operates on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionTarget {
    /// Region of the most recent successful `Locate` in the same execution.
    #[default]
    LastLocatedRegion,
    Region(Region),
    Location(Location),
    /// Literal payload, e.g. text to type.
    Text(String),
}

/// One step of a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "lowercase")]
pub enum Step {
    Locate {
        anchor: String,
    },
    Act {
        action: ActionKind,
        #[serde(default)]
        target: ActionTarget,
    },
}

impl Step {
    pub fn locate(anchor: impl Into<String>) -> Self {
        Step::Locate {
            anchor: anchor.into(),
        }
    }

    pub fn act(action: ActionKind, target: ActionTarget) -> Self {
        Step::Act { action, target }
    }
}

/// Directed edge between two declared states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl TransitionSpec {
    pub fn new(from: impl Into<String>, to: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            steps,
        }
    }
}

/// Currently active state ids.
///
/// Owned by the monitor context and mutated only by the scheduler worker or
/// the startup sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveStateSet {
    ids: BTreeSet<String>,
}

impl ActiveStateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, state_id: &str) -> bool {
        self.ids.contains(state_id)
    }

    pub fn activate(&mut self, state_id: &str) -> bool {
        self.ids.insert(state_id.to_string())
    }

    pub fn deactivate(&mut self, state_id: &str) -> bool {
        self.ids.remove(state_id)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Record a completed transition: `from` leaves, `to` enters.
    pub fn apply_transition(&mut self, transition: &TransitionSpec) {
        self.ids.remove(&transition.from);
        self.ids.insert(transition.to.clone());
    }

    /// Required ids that are not active, in the order given.
    pub fn missing<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|id| !self.ids.contains(id.as_str()))
            .map(String::as_str)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
