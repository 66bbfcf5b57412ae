//! Reachability over a step graph.
//!
//! Transitions are unit-weight edges, so shortest-path search degenerates to
//! a breadth-first walk with predecessor bookkeeping.

use crate::step::{StepEntity, StepId};
use std::collections::{HashMap, VecDeque};

/// Whether a step ends the graph: no transitions at all, or at least one
/// dangling (targetless) transition.
pub(crate) fn is_end_step(step: &dyn StepEntity) -> bool {
    let targets = step.outgoing_targets();
    targets.is_empty() || targets.iter().any(|t| t.is_none())
}

/// Find a path from `start` to any end step.
///
/// Returns the step ids along the path, start and end inclusive, or `None`
/// when no end step is reachable. Transitions targeting steps outside the
/// graph are ignored.
pub(crate) fn find_path_to_end(
    steps: &[Box<dyn StepEntity>],
    index: &HashMap<StepId, usize>,
    start: usize,
) -> Option<Vec<StepId>> {
    let mut predecessor: Vec<Option<usize>> = vec![None; steps.len()];
    let mut visited = vec![false; steps.len()];
    let mut queue = VecDeque::new();

    visited[start] = true;
    queue.push_back(start);

    while let Some(node) = queue.pop_front() {
        if is_end_step(steps[node].as_ref()) {
            let mut path = vec![steps[node].id()];
            let mut walk = node;
            while let Some(prev) = predecessor[walk] {
                path.push(steps[prev].id());
                walk = prev;
            }
            path.reverse();
            return Some(path);
        }

        for target in steps[node].outgoing_targets().into_iter().flatten() {
            let Some(&next) = index.get(&target) else {
                continue;
            };
            if !visited[next] {
                visited[next] = true;
                predecessor[next] = Some(node);
                queue.push_back(next);
            }
        }
    }

    None
}
