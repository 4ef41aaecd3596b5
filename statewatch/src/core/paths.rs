//! Shortest transition chain from the active states to a target state.

use std::collections::{HashMap, VecDeque};

use crate::core::states::{ActiveStateSet, TransitionSpec};

/// Breadth-first search over declared transitions.
///
/// Returns indices into `transitions`, in execution order, of the shortest
/// chain starting at any active state and ending at `target`. Ties resolve
/// by active-state order and then declaration order, so the result is
/// deterministic. `Some(vec![])` means `target` is already active.
pub fn plan_path(
    transitions: &[TransitionSpec],
    active: &ActiveStateSet,
    target: &str,
) -> Option<Vec<usize>> {
    if active.contains(target) {
        return Some(Vec::new());
    }

    // state -> (predecessor state, transition index)
    let mut came_from: HashMap<&str, Option<(&str, usize)>> = HashMap::new();
    let mut queue = VecDeque::new();
    for state in active.iter() {
        came_from.insert(state, None);
        queue.push_back(state);
    }

    while let Some(current) = queue.pop_front() {
        for (index, transition) in transitions.iter().enumerate() {
            if transition.from != current || came_from.contains_key(transition.to.as_str()) {
                continue;
            }
            came_from.insert(transition.to.as_str(), Some((current, index)));
            if transition.to == target {
                return Some(unwind(&came_from, target));
            }
            queue.push_back(transition.to.as_str());
        }
    }
    None
}

fn unwind(came_from: &HashMap<&str, Option<(&str, usize)>>, target: &str) -> Vec<usize> {
    let mut path = Vec::new();
    let mut cursor = target;
    while let Some(Some((previous, index))) = came_from.get(cursor) {
        path.push(*index);
        cursor = previous;
    }
    path.reverse();
    path
}
