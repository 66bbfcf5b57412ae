//! Step groups (chapters): an ordered graph of steps, itself usable as a
//! step.

use crate::entity::{Children, Entity, EntityData, EntityNode, Mode};
use crate::errors::{GraphError, StateError};
use crate::group::pathfind::find_path_to_end;
use crate::lifecycle::{ProcessFactories, Progress, Stage, StageEvent, StageProcess};
use crate::step::{StepEntity, StepId};
use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::mpsc;

/// A group-level outward transition mirroring one dangling transition of a
/// member step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkedTransition {
    /// The member step owning the mirrored dangling transition.
    pub source: StepId,
    /// The outward target in the enclosing graph, `None` while dangling.
    pub target: Option<StepId>,
}

/// Steps, graph bookkeeping and walk state of a group.
pub struct StepGroupData {
    name: String,
    id: StepId,
    steps: Vec<Box<dyn StepEntity>>,
    index: HashMap<StepId, usize>,
    first_step: Option<StepId>,
    current: Option<usize>,
    linked_transitions: Vec<LinkedTransition>,
    exit_step: Option<StepId>,
}

impl StepGroupData {
    /// The group's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All member steps, in insertion order.
    pub fn steps(&self) -> &[Box<dyn StepEntity>] {
        &self.steps
    }

    /// The currently running member step, if the walk is underway.
    pub fn current_step(&self) -> Option<&dyn StepEntity> {
        self.current.map(|i| self.steps[i].as_ref())
    }

    /// The group's outward transitions, one per member dangling transition.
    pub fn linked_transitions(&self) -> &[LinkedTransition] {
        &self.linked_transitions
    }

    /// The member step whose dangling transition ended the last walk.
    pub fn exit_step(&self) -> Option<StepId> {
        self.exit_step
    }

    fn first_index(&self) -> Option<usize> {
        let id = self.first_step.or_else(|| self.steps.first().map(|s| s.id()))?;
        self.index.get(&id).copied()
    }

    /// Rebuild the dangling-transition mirror, keeping outward targets of
    /// entries that survived the structural change.
    fn sync_linked_transitions(&mut self) {
        let old = std::mem::take(&mut self.linked_transitions);
        for step in &self.steps {
            let dangling = step
                .outgoing_targets()
                .iter()
                .filter(|t| t.is_none())
                .count();
            for ordinal in 0..dangling {
                let kept = old
                    .iter()
                    .filter(|l| l.source == step.id())
                    .nth(ordinal)
                    .map(|l| l.target);
                self.linked_transitions.push(LinkedTransition {
                    source: step.id(),
                    target: kept.flatten(),
                });
            }
        }
    }
}

impl EntityData for StepGroupData {
    // Sequence: exactly one step is live at a time and only it gets ticked.
    fn children(&mut self) -> Children<'_> {
        let current = self.current;
        Children::Sequence {
            current: current.map(move |i| self.steps[i].as_mut() as &mut dyn EntityNode),
        }
    }

    fn all_children(&mut self) -> Vec<&mut dyn EntityNode> {
        self.steps
            .iter_mut()
            .map(|s| s.as_mut() as &mut dyn EntityNode)
            .collect()
    }
}

enum WalkState {
    Begin,
    WaitForCompletion,
    Drain { next: Option<StepId> },
    Finished,
}

/// The group's activating process: walks the step graph from the first step
/// along completed transitions until a dangling transition exits the graph.
struct WalkStepsProcess {
    state: WalkState,
}

impl WalkStepsProcess {
    fn new() -> Self {
        Self {
            state: WalkState::Begin,
        }
    }

    fn resolve(
        data: &StepGroupData,
        step_name: &str,
        target: StepId,
    ) -> Result<usize> {
        data.index.get(&target).copied().ok_or_else(|| {
            anyhow!(GraphError::UnknownStep {
                step: step_name.to_string(),
                target: target.as_uuid(),
            })
        })
    }
}

impl StageProcess<StepGroupData> for WalkStepsProcess {
    fn start(&mut self, data: &mut StepGroupData) -> Result<()> {
        data.exit_step = None;
        data.current = None;
        self.state = WalkState::Finished;
        let Some(first) = data
            .first_step
            .or_else(|| data.steps.first().map(|s| s.id()))
        else {
            return Ok(());
        };
        let Some(&idx) = data.index.get(&first) else {
            return Err(anyhow!(GraphError::UnknownFirstStep {
                group: data.name.clone(),
                id: first.as_uuid(),
            }));
        };
        data.current = Some(idx);
        data.steps[idx].activate()?;
        self.state = WalkState::WaitForCompletion;
        Ok(())
    }

    fn update(&mut self, data: &mut StepGroupData) -> Result<Progress> {
        match self.state {
            WalkState::Begin | WalkState::Finished => Ok(Progress::Done),
            WalkState::WaitForCompletion => {
                let Some(cur) = data.current else {
                    self.state = WalkState::Finished;
                    return Ok(Progress::Done);
                };
                let fired = {
                    let step = &data.steps[cur];
                    if step.stage() == Stage::Active {
                        step.completed_transition_target()
                    } else {
                        None
                    }
                };
                if let Some(next) = fired {
                    tracing::debug!(
                        group = %data.name,
                        step = %data.steps[cur].display_name(),
                        "step completed, deactivating"
                    );
                    data.steps[cur].deactivate()?;
                    self.state = WalkState::Drain { next };
                }
                Ok(Progress::Pending)
            }
            WalkState::Drain { next } => {
                let Some(cur) = data.current else {
                    self.state = WalkState::Finished;
                    return Ok(Progress::Done);
                };
                if data.steps[cur].stage() != Stage::Inactive {
                    return Ok(Progress::Pending);
                }
                match next {
                    Some(target) => {
                        let name = data.steps[cur].display_name().to_string();
                        let idx = Self::resolve(data, &name, target)?;
                        data.current = Some(idx);
                        data.steps[idx].activate()?;
                        self.state = WalkState::WaitForCompletion;
                        Ok(Progress::Pending)
                    }
                    None => {
                        data.exit_step = Some(data.steps[cur].id());
                        data.current = None;
                        self.state = WalkState::Finished;
                        Ok(Progress::Done)
                    }
                }
            }
        }
    }

    fn end(&mut self, _data: &mut StepGroupData) -> Result<()> {
        Ok(())
    }

    /// Walk a shortest path from the current step to the graph end,
    /// activating, autocompleting and deactivating each step synchronously.
    fn fast_forward(&mut self, data: &mut StepGroupData) -> Result<()> {
        if matches!(self.state, WalkState::Finished) {
            return Ok(());
        }
        let start = match data.current.or_else(|| data.first_index()) {
            Some(idx) => idx,
            None => {
                self.state = WalkState::Finished;
                return Ok(());
            }
        };
        let path = find_path_to_end(&data.steps, &data.index, start).ok_or_else(|| {
            anyhow!(GraphError::NoPathToEnd {
                group: data.name.clone(),
                from: data.steps[start].display_name().to_string(),
            })
        })?;

        for (i, id) in path.iter().enumerate() {
            let idx = data.index[id];
            let step = &mut data.steps[idx];
            data.current = Some(idx);

            if step.stage() == Stage::Inactive {
                step.activate()
                    .map_err(|err| anyhow!(err).context("fast-forward activation"))?;
            }
            if step.stage() == Stage::Activating {
                step.mark_to_fast_forward_stage(Stage::Activating);
            }
            let next = path.get(i + 1).copied();
            step.autocomplete_transition_to(next);
            if step.stage() == Stage::Active {
                step.mark_to_fast_forward_stage(Stage::Active);
                step.mark_to_fast_forward_stage(Stage::Deactivating);
                step.deactivate()
                    .map_err(|err| anyhow!(err).context("fast-forward deactivation"))?;
            }
        }

        data.exit_step = path.last().copied();
        data.current = None;
        self.state = WalkState::Finished;
        Ok(())
    }
}

/// Aborts whichever step is currently running and waits it out.
struct AbortWalkProcess;

impl StageProcess<StepGroupData> for AbortWalkProcess {
    fn start(&mut self, data: &mut StepGroupData) -> Result<()> {
        if let Some(idx) = data.current {
            let step = &mut data.steps[idx];
            if !matches!(step.stage(), Stage::Inactive | Stage::Aborting) {
                step.abort()?;
            }
        }
        Ok(())
    }

    fn update(&mut self, data: &mut StepGroupData) -> Result<Progress> {
        match data.current {
            None => Ok(Progress::Done),
            Some(idx) => {
                if data.steps[idx].stage() == Stage::Inactive {
                    data.current = None;
                    Ok(Progress::Done)
                } else {
                    Ok(Progress::Pending)
                }
            }
        }
    }

    fn end(&mut self, _data: &mut StepGroupData) -> Result<()> {
        Ok(())
    }

    fn fast_forward(&mut self, data: &mut StepGroupData) -> Result<()> {
        if let Some(idx) = data.current {
            data.steps[idx].mark_to_fast_forward_stage(Stage::Aborting);
        }
        Ok(())
    }
}

fn group_factories() -> ProcessFactories<StepGroupData> {
    ProcessFactories::default()
        .with_activating(|| Box::new(WalkStepsProcess::new()))
        .with_aborting(|| Box::new(AbortWalkProcess))
}

/// A chapter: an ordered graph of steps linked by transitions.
///
/// Implements [`StepEntity`] itself, so a whole group nests inside another
/// group as a first-class step; its outward transitions are the linked
/// mirror of its members' dangling transitions.
pub struct StepGroup {
    entity: Entity<StepGroupData>,
}

impl StepGroup {
    /// Create an empty group.
    pub fn new(name: &str) -> Self {
        Self {
            entity: Entity::new(
                name,
                StepGroupData {
                    name: name.to_string(),
                    id: StepId::new(),
                    steps: Vec::new(),
                    index: HashMap::new(),
                    first_step: None,
                    current: None,
                    linked_transitions: Vec::new(),
                    exit_step: None,
                },
                group_factories(),
            ),
        }
    }

    /// Add a step, builder style. The first step added becomes the entry
    /// point unless overridden with [`with_first_step`](Self::with_first_step).
    ///
    /// A step whose id is already a member is logged and dropped.
    pub fn with_step(mut self, step: impl StepEntity + 'static) -> Self {
        if let Err(err) = self.add_step(Box::new(step)) {
            tracing::warn!(group = %self.display_name(), "dropping step: {err}");
        }
        self
    }

    /// Override the entry point.
    pub fn with_first_step(mut self, id: StepId) -> Self {
        self.entity.data_mut().first_step = Some(id);
        self
    }

    /// Add a step and re-sync the dangling-transition mirror.
    pub fn add_step(&mut self, step: Box<dyn StepEntity>) -> Result<(), GraphError> {
        let data = self.entity.data_mut();
        if data.index.contains_key(&step.id()) {
            return Err(GraphError::DuplicateStep {
                group: data.name.clone(),
                id: step.id().as_uuid(),
            });
        }
        data.index.insert(step.id(), data.steps.len());
        data.steps.push(step);
        data.sync_linked_transitions();
        Ok(())
    }

    /// Remove a step by id and re-sync the dangling-transition mirror.
    ///
    /// Structural mutation is an authoring-time operation; the walk state of
    /// a running group is not preserved across it.
    pub fn remove_step(&mut self, id: StepId) -> Option<Box<dyn StepEntity>> {
        let data = self.entity.data_mut();
        let idx = data.index.remove(&id)?;
        let removed = data.steps.remove(idx);
        data.index = data
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id(), i))
            .collect();
        data.current = None;
        data.sync_linked_transitions();
        Some(removed)
    }

    /// Retarget the group's outward transition mirrored from `source`.
    pub fn set_linked_target(&mut self, source: StepId, target: Option<StepId>) {
        for linked in &mut self.entity.data_mut().linked_transitions {
            if linked.source == source {
                linked.target = target;
            }
        }
    }

    /// Subscribe this group's own lifecycle to a stage-event channel.
    pub fn set_event_channel(&mut self, tx: mpsc::Sender<StageEvent>) {
        self.entity.set_event_channel(tx);
    }

    /// The group's data.
    pub fn data(&self) -> &StepGroupData {
        self.entity.data()
    }

    /// Whether the current step has a completed transition, mirroring the
    /// condition the walk uses to advance.
    pub fn should_deactivate_current(&self) -> bool {
        self.entity
            .data()
            .current_step()
            .is_some_and(|step| step.completed_transition_target().is_some())
    }

    /// Request skipping to the group's logical end.
    ///
    /// Fails synchronously, leaving the stage unchanged, when no path from
    /// the current step to an end step exists.
    pub fn fast_forward(&mut self) -> Result<(), GraphError> {
        let data = self.entity.data();
        if let Some(start) = data.current.or_else(|| data.first_index())
            && !data.steps.is_empty()
            && find_path_to_end(&data.steps, &data.index, start).is_none()
        {
            return Err(GraphError::NoPathToEnd {
                group: data.name.clone(),
                from: data.steps[start].display_name().to_string(),
            });
        }
        self.entity.mark_to_fast_forward();
        Ok(())
    }
}

impl EntityNode for StepGroup {
    fn display_name(&self) -> &str {
        self.entity.display_name()
    }

    fn stage(&self) -> Stage {
        self.entity.stage()
    }

    fn activate(&mut self) -> Result<(), StateError> {
        self.entity.activate()
    }

    fn deactivate(&mut self) -> Result<(), StateError> {
        self.entity.deactivate()
    }

    fn abort(&mut self) -> Result<(), StateError> {
        self.entity.abort()
    }

    fn update(&mut self) {
        self.entity.update();
    }

    fn mark_to_fast_forward(&mut self) {
        self.entity.mark_to_fast_forward();
    }

    fn mark_to_fast_forward_stage(&mut self, stage: Stage) {
        self.entity.mark_to_fast_forward_stage(stage);
    }

    fn configure(&mut self, mode: &Mode) {
        self.entity.configure(mode);
    }

    fn set_parent_name(&mut self, parent: &str) {
        self.entity.set_parent_name(parent);
    }
}

impl StepEntity for StepGroup {
    fn id(&self) -> StepId {
        self.entity.data().id
    }

    fn outgoing_targets(&self) -> Vec<Option<StepId>> {
        self.entity
            .data()
            .linked_transitions
            .iter()
            .map(|l| l.target)
            .collect()
    }

    fn completed_transition_target(&self) -> Option<Option<StepId>> {
        let data = self.entity.data();
        let exit = data.exit_step?;
        let linked = data
            .linked_transitions
            .iter()
            .find(|l| l.source == exit)?;
        Some(linked.target)
    }

    fn autocomplete_transition_to(&mut self, _target: Option<StepId>) {
        self.entity.mark_to_fast_forward();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{Condition, Step, Transition};
    use std::cell::Cell;
    use std::rc::Rc;

    struct Flag(Rc<Cell<bool>>);

    impl Condition for Flag {
        fn is_satisfied(&self) -> bool {
            self.0.get()
        }

        fn complete(&mut self) {
            self.0.set(true);
        }
    }

    fn flagged_step(name: &str, target: Option<StepId>) -> (Step, Rc<Cell<bool>>) {
        let flag = Rc::new(Cell::new(false));
        let step = Step::new(name).with_transition(Transition::new(
            &format!("{name} done"),
            vec![Box::new(Flag(flag.clone()))],
            target,
        ));
        (step, flag)
    }

    fn pump(group: &mut StepGroup, ticks: usize) {
        for _ in 0..ticks {
            group.update();
        }
    }

    #[test]
    fn test_empty_group_activates_immediately() {
        let mut group = StepGroup::new("empty chapter");
        group.activate().unwrap();
        pump(&mut group, 2);
        assert_eq!(group.stage(), Stage::Active);
    }

    #[test]
    fn test_linked_transitions_mirror_dangling_transitions() {
        let (a, _) = flagged_step("a", None);
        let a_id = a.id();
        let b = Step::new("b").with_transition(Transition::to(a_id));

        let mut group = StepGroup::new("chapter").with_step(a).with_step(b);
        assert_eq!(group.data().linked_transitions().len(), 1);
        assert_eq!(group.data().linked_transitions()[0].source, a_id);

        group.remove_step(a_id);
        assert!(group.data().linked_transitions().is_empty());
    }

    #[test]
    fn test_linked_target_survives_resync() {
        let (a, _) = flagged_step("a", None);
        let a_id = a.id();
        let outer = StepId::new();

        let mut group = StepGroup::new("chapter").with_step(a);
        group.set_linked_target(a_id, Some(outer));

        let (b, _) = flagged_step("b", None);
        group.add_step(Box::new(b)).unwrap();
        let linked: Vec<_> = group.data().linked_transitions().to_vec();
        assert_eq!(linked.len(), 2);
        assert_eq!(linked[0].target, Some(outer));
        assert_eq!(linked[1].target, None);
    }

    #[test]
    fn test_duplicate_step_id_is_rejected() {
        let id = StepId::new();
        let mut group = StepGroup::new("chapter").with_step(Step::new("a").with_id(id));
        let err = group
            .add_step(Box::new(Step::new("impostor").with_id(id)))
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateStep { .. }));
        assert_eq!(group.data().steps().len(), 1);
    }

    #[test]
    fn test_should_deactivate_current_mirrors_advance_condition() {
        let (a, flag) = flagged_step("a", None);
        let mut group = StepGroup::new("chapter").with_step(a);
        group.activate().unwrap();
        pump(&mut group, 4);
        assert!(!group.should_deactivate_current());

        flag.set(true);
        pump(&mut group, 2);
        assert!(group.should_deactivate_current());
    }

    #[test]
    fn test_fast_forward_without_path_fails_and_keeps_stage() {
        let a = Step::new("a");
        let b = Step::new("b").with_transition(Transition::to(a.id()));
        let a = a.with_transition(Transition::to(b.id()));

        let mut group = StepGroup::new("looping chapter").with_step(a).with_step(b);
        group.activate().unwrap();
        pump(&mut group, 3);
        assert_eq!(group.stage(), Stage::Activating);

        let err = group.fast_forward().unwrap_err();
        assert!(matches!(err, GraphError::NoPathToEnd { .. }));
        assert_eq!(group.stage(), Stage::Activating);
    }

    #[test]
    fn test_fast_forward_walks_to_the_end() {
        let (c, _) = flagged_step("c", None);
        let (b, _) = flagged_step("b", Some(c.id()));
        let (a, _) = flagged_step("a", Some(b.id()));
        let c_id = c.id();

        let mut group = StepGroup::new("chapter")
            .with_step(a)
            .with_step(b)
            .with_step(c);
        group.activate().unwrap();
        pump(&mut group, 2);
        assert_eq!(group.stage(), Stage::Activating);

        group.fast_forward().unwrap();
        pump(&mut group, 1);
        assert_eq!(group.stage(), Stage::Active);
        assert_eq!(group.data().exit_step(), Some(c_id));
        assert!(group.data().steps().iter().all(|s| s.stage() == Stage::Inactive));
    }
}
