//! Actuator abstraction for input actions (click, type, highlight, move).

use anyhow::Result;
use tracing::{info, instrument};

use crate::core::region::{Location, Region};
use crate::core::states::ActionKind;

/// Concrete operand of an action once `last-located-region` is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActTarget {
    Region(Region),
    Location(Location),
    Text(String),
}

impl std::fmt::Display for ActTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActTarget::Region(region) => write!(f, "region {}", region),
            ActTarget::Location(location) => write!(f, "location ({},{})", location.x, location.y),
            ActTarget::Text(text) => write!(f, "text {:?}", text),
        }
    }
}

/// Abstraction over input backends. `Err` means the action failed at the
/// OS/input level.
pub trait Actuator: Send + Sync {
    fn act(&self, action: ActionKind, target: &ActTarget) -> Result<()>;
}

/// Actuator used in replay mode: actions are logged, never performed.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedActuator;

impl Actuator for SimulatedActuator {
    #[instrument(skip_all, fields(%action))]
    fn act(&self, action: ActionKind, target: &ActTarget) -> Result<()> {
        info!(%target, "simulated action");
        Ok(())
    }
}

/// Move the pointer to its neutral position. Used as the shutdown action.
pub fn park_pointer(actuator: &dyn Actuator, neutral: Location) -> Result<()> {
    actuator.act(ActionKind::Move, &ActTarget::Location(neutral))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        acts: Mutex<Vec<(ActionKind, ActTarget)>>,
    }

    impl Actuator for Recorder {
        fn act(&self, action: ActionKind, target: &ActTarget) -> Result<()> {
            self.acts
                .lock()
                .expect("lock")
                .push((action, target.clone()));
            Ok(())
        }
    }

    #[test]
    fn park_pointer_moves_to_neutral() {
        let recorder = Recorder::default();
        park_pointer(&recorder, Location { x: 5, y: 6 }).expect("park");
        assert_eq!(
            recorder.acts.lock().expect("lock").as_slice(),
            &[(ActionKind::Move, ActTarget::Location(Location { x: 5, y: 6 }))]
        );
    }

    #[test]
    fn simulated_actuator_accepts_everything() {
        SimulatedActuator
            .act(ActionKind::Type, &ActTarget::Text("hi".to_string()))
            .expect("act");
    }
}
