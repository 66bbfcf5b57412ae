//! Transitions: directed edges between steps, completed by conditions.

use crate::entity::{Entity, EntityData, EntityNode, Mode};
use crate::errors::StateError;
use crate::lifecycle::{ProcessFactories, Progress, Stage, StageProcess};
use crate::step::lock::LockablePropertyReference;
use crate::step::step::StepId;
use anyhow::Result;

/// A condition a transition waits on while its step is active.
///
/// Concrete conditions (timers, proximity, object grabbed, ...) live outside
/// the engine; the engine only polls satisfaction, force-completes during
/// fast-forward and collects referenced lockable properties for the owning
/// step's unlock set.
pub trait Condition {
    /// Whether the condition currently holds.
    fn is_satisfied(&self) -> bool;

    /// Force the condition into its satisfied state (autocomplete).
    fn complete(&mut self);

    /// Lockable properties this condition needs unlocked while checked.
    fn lockable_properties(&self) -> Vec<LockablePropertyReference> {
        Vec::new()
    }
}

/// Data of a transition: its conditions, optional target step and completion
/// flag.
pub struct TransitionData {
    conditions: Vec<Box<dyn Condition>>,
    target: Option<StepId>,
    completed: bool,
}

impl EntityData for TransitionData {}

/// Resets the completion flag on every activation.
struct ArmProcess;

impl StageProcess<TransitionData> for ArmProcess {
    fn start(&mut self, data: &mut TransitionData) -> Result<()> {
        data.completed = false;
        Ok(())
    }

    fn update(&mut self, _data: &mut TransitionData) -> Result<Progress> {
        Ok(Progress::Done)
    }

    fn end(&mut self, _data: &mut TransitionData) -> Result<()> {
        Ok(())
    }

    fn fast_forward(&mut self, _data: &mut TransitionData) -> Result<()> {
        Ok(())
    }
}

/// Waits until every condition is satisfied, then marks the transition
/// completed.
struct WatchConditionsProcess;

impl StageProcess<TransitionData> for WatchConditionsProcess {
    fn start(&mut self, _data: &mut TransitionData) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, data: &mut TransitionData) -> Result<Progress> {
        if data.completed {
            return Ok(Progress::Done);
        }
        if data.conditions.iter().all(|c| c.is_satisfied()) {
            data.completed = true;
            return Ok(Progress::Done);
        }
        Ok(Progress::Pending)
    }

    fn end(&mut self, _data: &mut TransitionData) -> Result<()> {
        Ok(())
    }

    fn fast_forward(&mut self, data: &mut TransitionData) -> Result<()> {
        data.force_complete();
        Ok(())
    }
}

impl TransitionData {
    fn force_complete(&mut self) {
        for condition in &mut self.conditions {
            if !condition.is_satisfied() {
                condition.complete();
            }
        }
        self.completed = true;
    }
}

/// A directed edge from a step to a target step (or none, for a chapter
/// exit), completed when all its conditions are satisfied.
pub struct Transition {
    entity: Entity<TransitionData>,
}

impl Transition {
    /// Create a transition guarded by the given conditions.
    ///
    /// A transition without conditions completes on the first tick after its
    /// step activates.
    pub fn new(name: &str, conditions: Vec<Box<dyn Condition>>, target: Option<StepId>) -> Self {
        let factories = ProcessFactories::default()
            .with_activating(|| Box::new(ArmProcess))
            .with_active(|| Box::new(WatchConditionsProcess));
        Self {
            entity: Entity::new(
                name,
                TransitionData {
                    conditions,
                    target,
                    completed: false,
                },
                factories,
            ),
        }
    }

    /// An unguarded transition to the given target.
    pub fn to(target: StepId) -> Self {
        Self::new("continue", Vec::new(), Some(target))
    }

    /// An unguarded dangling transition (chapter exit).
    pub fn exit() -> Self {
        Self::new("exit", Vec::new(), None)
    }

    /// Whether the transition has fired.
    pub fn is_completed(&self) -> bool {
        self.entity.data().completed
    }

    /// The target step, `None` for a dangling transition.
    pub fn target(&self) -> Option<StepId> {
        self.entity.data().target
    }

    /// Retarget the transition (used when mirroring dangling transitions onto
    /// an enclosing group).
    pub fn set_target(&mut self, target: Option<StepId>) {
        self.entity.data_mut().target = target;
    }

    /// Force-complete every condition and fire the transition.
    pub fn autocomplete(&mut self) {
        self.entity.data_mut().force_complete();
    }

    /// Lockable properties referenced by this transition's conditions.
    pub fn lockable_properties(&self) -> Vec<LockablePropertyReference> {
        self.entity
            .data()
            .conditions
            .iter()
            .flat_map(|c| c.lockable_properties())
            .collect()
    }
}

impl EntityNode for Transition {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Condition toggled from the outside, as a scene-layer stand-in.
    pub(crate) struct Flag(pub Rc<Cell<bool>>);

    impl Condition for Flag {
        fn is_satisfied(&self) -> bool {
            self.0.get()
        }

        fn complete(&mut self) {
            self.0.set(true);
        }
    }

    #[test]
    fn test_transition_completes_when_all_conditions_hold() {
        let first = Rc::new(Cell::new(false));
        let second = Rc::new(Cell::new(false));
        let mut transition = Transition::new(
            "both flags",
            vec![
                Box::new(Flag(first.clone())),
                Box::new(Flag(second.clone())),
            ],
            None,
        );

        transition.activate().unwrap();
        transition.update(); // activating -> active
        transition.update();
        assert!(!transition.is_completed());

        first.set(true);
        transition.update();
        assert!(!transition.is_completed());

        second.set(true);
        transition.update();
        assert!(transition.is_completed());
    }

    #[test]
    fn test_unguarded_transition_completes_immediately() {
        let mut transition = Transition::exit();
        transition.activate().unwrap();
        transition.update();
        transition.update();
        assert!(transition.is_completed());
        assert_eq!(transition.target(), None);
    }

    #[test]
    fn test_autocomplete_forces_conditions() {
        let flag = Rc::new(Cell::new(false));
        let mut transition = Transition::new("flag", vec![Box::new(Flag(flag.clone()))], None);

        transition.autocomplete();
        assert!(transition.is_completed());
        assert!(flag.get());
    }

    #[test]
    fn test_reactivation_rearms_the_transition() {
        let mut transition = Transition::new("empty", Vec::new(), None);
        transition.activate().unwrap();
        transition.update();
        transition.update();
        assert!(transition.is_completed());

        transition.deactivate().unwrap();
        transition.update();
        assert_eq!(transition.stage(), Stage::Inactive);

        transition.activate().unwrap();
        assert!(!transition.is_completed());
    }
}
