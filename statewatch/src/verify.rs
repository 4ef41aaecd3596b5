//! State verification: decide which states are active by finding anchors.

use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::paths::plan_path;
use crate::core::states::{ActivationRule, StateSpec};
use crate::monitor::Monitor;

/// Result of a verification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// States found active during this pass.
    pub active: Vec<String>,
    /// States checked and not found.
    pub inactive: Vec<String>,
    /// Initial states activated because nothing was found.
    pub initial_applied: Vec<String>,
    /// The pass stopped early because a stop was requested.
    pub cancelled: bool,
}

/// Verify `state_ids` and update the active-state set accordingly.
///
/// States are checked in the order given; unknown ids are skipped. The stop
/// signal is checked between states.
#[instrument(skip_all, fields(states = state_ids.len()))]
pub fn verify_states(
    monitor: &mut Monitor,
    state_ids: &[String],
    cancel: &CancelToken,
) -> VerifyReport {
    let mut report = VerifyReport::default();
    for state_id in state_ids {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let Some(state) = monitor.catalog().state(state_id).cloned() else {
            warn!(state = %state_id, "verification skipped unknown state");
            continue;
        };
        if state_visible(monitor, &state) {
            monitor.active_states_mut().activate(&state.id);
            report.active.push(state.id);
        } else {
            monitor.active_states_mut().deactivate(&state.id);
            report.inactive.push(state.id);
        }
    }
    debug!(active = ?report.active, inactive = ?report.inactive, "verification pass");
    report
}

/// Verify every declared state.
pub fn verify_all(monitor: &mut Monitor, cancel: &CancelToken) -> VerifyReport {
    let ids: Vec<String> = monitor
        .catalog()
        .states
        .iter()
        .map(|state| state.id.clone())
        .collect();
    verify_states(monitor, &ids, cancel)
}

/// Rebuild the active-state set from scratch before the scheduler starts.
///
/// Every state is verified. If none is visible, the states flagged initial
/// are activated.
pub fn startup_verification(monitor: &mut Monitor) -> VerifyReport {
    monitor.active_states_mut().clear();
    let mut report = verify_all(monitor, &CancelToken::new());
    if monitor.active_states().is_empty() {
        let initial: Vec<String> = monitor
            .catalog()
            .initial_states()
            .map(|state| state.id.clone())
            .collect();
        for id in &initial {
            monitor.active_states_mut().activate(id);
        }
        report.initial_applied = initial;
    }
    info!(
        active = ?monitor.active_states().iter().collect::<Vec<_>>(),
        initial = ?report.initial_applied,
        "startup verification complete"
    );
    report
}

/// Try to make every state in `missing` active.
///
/// Missing states are first re-verified directly. Any still missing are
/// reached through the shortest chain of declared transitions; the set is
/// updated after each successful transition. Returns true when all are active.
#[instrument(skip_all, fields(missing = missing.len()))]
pub fn restore_states(monitor: &mut Monitor, missing: &[String], cancel: &CancelToken) -> bool {
    verify_states(monitor, missing, cancel);

    for target in missing {
        if cancel.is_cancelled() {
            return false;
        }
        if monitor.active_states().contains(target) {
            continue;
        }
        let Some(path) = plan_path(
            &monitor.catalog().transitions,
            monitor.active_states(),
            target,
        ) else {
            warn!(state = %target, "no transition path to required state");
            return false;
        };
        for index in path {
            let transition = monitor.catalog().transitions[index].clone();
            let outcome = monitor.perform_transition(&transition, cancel);
            if !outcome.is_success() {
                warn!(
                    state = %target,
                    from = %transition.from,
                    to = %transition.to,
                    ?outcome,
                    "rebuild transition failed"
                );
                return false;
            }
        }
    }
    monitor.active_states().missing(missing).is_empty()
}

fn state_visible(monitor: &mut Monitor, state: &StateSpec) -> bool {
    if state.anchors.is_empty() {
        return false;
    }
    let rule = monitor.search().activation;
    let mut found_any = false;
    for anchor in &state.anchors {
        let found = match monitor.find(anchor) {
            Ok(found) => found.is_some(),
            Err(err) => {
                warn!(
                    state = %state.id,
                    anchor = %anchor,
                    error = %format!("{:#}", err),
                    "anchor check failed"
                );
                false
            }
        };
        match (rule, found) {
            (ActivationRule::Any, true) => return true,
            (ActivationRule::All, false) => return false,
            _ => found_any |= found,
        }
    }
    found_any
}
