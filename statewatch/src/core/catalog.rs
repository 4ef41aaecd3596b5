//! Registration table of anchors, states and transitions.
//!
//! Built once at startup and checked for referential integrity before the
//! scheduler is constructed. Validation collects every violation instead of
//! stopping at the first one.

use std::collections::HashSet;

use anyhow::{Result, bail};

use crate::core::anchors::{AnchorSpec, RegionSource};
use crate::core::states::{ActionTarget, StateSpec, Step, TransitionSpec};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub anchors: Vec<AnchorSpec>,
    pub states: Vec<StateSpec>,
    pub transitions: Vec<TransitionSpec>,
}

impl Catalog {
    /// Build a catalog, failing with every integrity violation found.
    pub fn new(
        anchors: Vec<AnchorSpec>,
        states: Vec<StateSpec>,
        transitions: Vec<TransitionSpec>,
    ) -> Result<Self> {
        let catalog = Self {
            anchors,
            states,
            transitions,
        };
        let errors = validate_catalog(&catalog);
        if !errors.is_empty() {
            bail!("catalog violations:\n- {}", errors.join("\n- "));
        }
        Ok(catalog)
    }

    pub fn state(&self, state_id: &str) -> Option<&StateSpec> {
        self.states.iter().find(|state| state.id == state_id)
    }

    pub fn anchor(&self, anchor_id: &str) -> Option<&AnchorSpec> {
        self.anchors.iter().find(|anchor| anchor.id == anchor_id)
    }

    pub fn initial_states(&self) -> impl Iterator<Item = &StateSpec> {
        self.states.iter().filter(|state| state.initial)
    }
}

/// Check referential integrity:
/// - No duplicate anchor or state ids
/// - Every anchor belongs to a declared state and every state anchor exists
/// - Static regions have positive size
/// - Dependencies name an existing anchor of the named state, not themselves
/// - Transitions connect two distinct declared states
/// - Locate steps name existing anchors; `last-located-region` follows a locate
pub fn validate_catalog(catalog: &Catalog) -> Vec<String> {
    let mut errors = Vec::new();

    let mut anchor_ids = HashSet::new();
    for anchor in &catalog.anchors {
        if !anchor_ids.insert(anchor.id.as_str()) {
            errors.push(format!("duplicate anchor id '{}'", anchor.id));
        }
    }
    let mut state_ids = HashSet::new();
    for state in &catalog.states {
        if !state_ids.insert(state.id.as_str()) {
            errors.push(format!("duplicate state id '{}'", state.id));
        }
    }

    for anchor in &catalog.anchors {
        validate_anchor(catalog, anchor, &state_ids, &mut errors);
    }

    for state in &catalog.states {
        for anchor_id in &state.anchors {
            if !anchor_ids.contains(anchor_id.as_str()) {
                errors.push(format!(
                    "state '{}': unknown anchor '{}'",
                    state.id, anchor_id
                ));
            }
        }
    }

    for (index, transition) in catalog.transitions.iter().enumerate() {
        validate_transition(index, transition, &state_ids, &anchor_ids, &mut errors);
    }

    errors
}

/// Report required state ids that the catalog does not declare.
pub fn validate_required_states(catalog: &Catalog, required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|id| catalog.state(id).is_none())
        .map(|id| format!("required state '{}' is not declared", id))
        .collect()
}

fn validate_anchor(
    catalog: &Catalog,
    anchor: &AnchorSpec,
    state_ids: &HashSet<&str>,
    errors: &mut Vec<String>,
) {
    if !state_ids.contains(anchor.state.as_str()) {
        errors.push(format!(
            "anchor '{}': unknown owner state '{}'",
            anchor.id, anchor.state
        ));
    }
    match &anchor.source {
        RegionSource::Whole => {}
        RegionSource::Static(region) => {
            if !region.has_positive_size() {
                errors.push(format!(
                    "anchor '{}': static region {} must have positive size",
                    anchor.id, region
                ));
            }
        }
        RegionSource::Dependent(dep) => {
            if dep.target_anchor == anchor.id {
                errors.push(format!("anchor '{}': depends on itself", anchor.id));
            }
            match catalog.anchor(&dep.target_anchor) {
                None => errors.push(format!(
                    "anchor '{}': dependency target '{}' is not declared",
                    anchor.id, dep.target_anchor
                )),
                Some(target) if target.state != dep.target_state => errors.push(format!(
                    "anchor '{}': dependency target '{}' belongs to state '{}', not '{}'",
                    anchor.id, dep.target_anchor, target.state, dep.target_state
                )),
                Some(_) => {}
            }
        }
    }
}

fn validate_transition(
    index: usize,
    transition: &TransitionSpec,
    state_ids: &HashSet<&str>,
    anchor_ids: &HashSet<&str>,
    errors: &mut Vec<String>,
) {
    let label = format!("transition #{} ({} -> {})", index, transition.from, transition.to);
    if !state_ids.contains(transition.from.as_str()) {
        errors.push(format!("{}: unknown from state", label));
    }
    if !state_ids.contains(transition.to.as_str()) {
        errors.push(format!("{}: unknown to state", label));
    }
    if transition.from == transition.to {
        errors.push(format!("{}: from and to must differ", label));
    }

    let mut located = false;
    for (step_index, step) in transition.steps.iter().enumerate() {
        match step {
            Step::Locate { anchor } => {
                if !anchor_ids.contains(anchor.as_str()) {
                    errors.push(format!(
                        "{}: step {} locates unknown anchor '{}'",
                        label, step_index, anchor
                    ));
                }
                located = true;
            }
            Step::Act { target, .. } => match target {
                ActionTarget::LastLocatedRegion if !located => errors.push(format!(
                    "{}: step {} acts on last-located-region before any locate",
                    label, step_index
                )),
                ActionTarget::Region(region) if !region.has_positive_size() => {
                    errors.push(format!(
                        "{}: step {} targets region {} with non-positive size",
                        label, step_index, region
                    ));
                }
                _ => {}
            },
        }
    }
}
