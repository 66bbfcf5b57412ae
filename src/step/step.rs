//! Steps: the unit a chapter sequences.
//!
//! A step owns behaviors and transitions. Per stage it composes:
//! - Activating: fold-activate all children
//! - Active: hold children running, unlock properties on entry, then wait
//!   for any completed transition (the sole natural exit); fast-forward
//!   forces every child's active process to its terminal value
//! - Deactivating: fold-deactivate all children, lock properties on exit
//! - Aborting: force-lock, then abort all children in parallel

use crate::entity::{
    Children, Entity, EntityData, EntityNode, FoldedActivatingProcess, FoldedActiveProcess,
    FoldedDeactivatingProcess, Mode, ParallelAbortProcess,
};
use crate::errors::StateError;
use crate::lifecycle::{
    CompositeProcess, ProcessFactories, Progress, Stage, StageEvent, StageProcess,
};
use crate::step::lock::{
    LockablePropertyReference, NonLockingStepLockHandling, SharedLockHandling, StepLockHandling,
};
use crate::step::transition::Transition;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use uuid::Uuid;

/// Unique identity of a step within a procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(Uuid);

impl StepId {
    /// Mint a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying uuid.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The surface a chapter sequences over.
///
/// Both [`Step`] and `StepGroup` implement it, which is what lets a whole
/// group nest inside another group as a first-class step.
pub trait StepEntity: EntityNode {
    /// Stable identity within the owning graph.
    fn id(&self) -> StepId;

    /// Targets of all outgoing transitions; `None` entries are dangling
    /// (graph exits).
    fn outgoing_targets(&self) -> Vec<Option<StepId>>;

    /// Target of the first completed transition, if any fired yet.
    fn completed_transition_target(&self) -> Option<Option<StepId>>;

    /// Force-complete the transition toward `target` (or, failing that, any
    /// incomplete transition). Used by group fast-forward.
    fn autocomplete_transition_to(&mut self, target: Option<StepId>);
}

/// Name, description, children and lock bookkeeping of a step.
pub struct StepData {
    name: String,
    description: String,
    id: StepId,
    behaviors: Vec<Box<dyn EntityNode>>,
    transitions: Vec<Transition>,
    manual_unlock: Vec<LockablePropertyReference>,
    lock_handling: SharedLockHandling,
}

impl StepData {
    /// The step's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The authored description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The step's transitions.
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// The first completed transition, if any.
    pub fn completed_transition(&self) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.is_completed())
    }

    /// The exact set of properties to unlock for this step: manually flagged
    /// references plus everything the transition conditions reference.
    fn unlock_set(&self) -> Vec<LockablePropertyReference> {
        let mut set = self.manual_unlock.clone();
        for transition in &self.transitions {
            for reference in transition.lockable_properties() {
                if !set.contains(&reference) {
                    set.push(reference);
                }
            }
        }
        set
    }

    fn with_lock_handler<R>(
        &self,
        f: impl FnOnce(&mut dyn StepLockHandling) -> R,
    ) -> Result<R> {
        let mut guard = self
            .lock_handling
            .lock()
            .map_err(|_| anyhow!("step lock handling poisoned"))?;
        Ok(f(&mut *guard))
    }
}

impl EntityData for StepData {
    // A step's children are behaviors plus transitions, all updated every
    // tick while the step runs; there is no `Current` sequencing here.
    fn children(&mut self) -> Children<'_> {
        Children::Collection(step_children(self))
    }

    fn all_children(&mut self) -> Vec<&mut dyn EntityNode> {
        step_children(self)
    }
}

fn step_children(data: &mut StepData) -> Vec<&mut dyn EntityNode> {
    data.behaviors
        .iter_mut()
        .map(|b| b.as_mut() as &mut dyn EntityNode)
        .chain(
            data.transitions
                .iter_mut()
                .map(|t| t as &mut dyn EntityNode),
        )
        .collect()
}

/// Unlocks the step's property set exactly once at Active entry.
struct UnlockProcess {
    properties: Vec<LockablePropertyReference>,
}

impl StageProcess<StepData> for UnlockProcess {
    fn start(&mut self, data: &mut StepData) -> Result<()> {
        self.properties = data.unlock_set();
        data.with_lock_handler(|h| h.unlock(&data.name, &self.properties))
    }

    fn update(&mut self, _data: &mut StepData) -> Result<Progress> {
        Ok(Progress::Done)
    }

    fn end(&mut self, _data: &mut StepData) -> Result<()> {
        Ok(())
    }

    fn fast_forward(&mut self, _data: &mut StepData) -> Result<()> {
        Ok(())
    }
}

/// Locks the step's property set exactly once at Deactivating exit.
struct LockProcess {
    properties: Vec<LockablePropertyReference>,
    at_start: bool,
}

impl LockProcess {
    /// Lock when the deactivating stage ends.
    fn on_end() -> Self {
        Self {
            properties: Vec::new(),
            at_start: false,
        }
    }

    /// Lock immediately on stage entry (aborting: release held resources
    /// before anything else happens).
    fn on_start() -> Self {
        Self {
            properties: Vec::new(),
            at_start: true,
        }
    }
}

impl StageProcess<StepData> for LockProcess {
    fn start(&mut self, data: &mut StepData) -> Result<()> {
        self.properties = data.unlock_set();
        if self.at_start {
            data.with_lock_handler(|h| h.lock(&data.name, &self.properties))?;
        }
        Ok(())
    }

    fn update(&mut self, _data: &mut StepData) -> Result<Progress> {
        Ok(Progress::Done)
    }

    fn end(&mut self, data: &mut StepData) -> Result<()> {
        if !self.at_start {
            data.with_lock_handler(|h| h.lock(&data.name, &self.properties))?;
        }
        Ok(())
    }

    fn fast_forward(&mut self, _data: &mut StepData) -> Result<()> {
        Ok(())
    }
}

/// The sole natural exit from a step's Active stage: ends the instant any
/// transition reports completion.
struct WaitForTransitionProcess;

impl StageProcess<StepData> for WaitForTransitionProcess {
    fn start(&mut self, _data: &mut StepData) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, data: &mut StepData) -> Result<Progress> {
        if data.completed_transition().is_some() {
            Ok(Progress::Done)
        } else {
            Ok(Progress::Pending)
        }
    }

    fn end(&mut self, _data: &mut StepData) -> Result<()> {
        Ok(())
    }

    fn fast_forward(&mut self, data: &mut StepData) -> Result<()> {
        if data.completed_transition().is_none()
            && let Some(transition) = data.transitions.first_mut()
        {
            transition.autocomplete();
        }
        Ok(())
    }
}

fn children_accessor() -> crate::entity::ChildAccessor<StepData> {
    Box::new(|data: &mut StepData| step_children(data))
}

fn step_factories() -> ProcessFactories<StepData> {
    ProcessFactories::default()
        .with_activating(|| {
            Box::new(CompositeProcess::new(vec![Box::new(
                FoldedActivatingProcess::new(children_accessor()),
            )]))
        })
        .with_active(|| {
            Box::new(CompositeProcess::new(vec![
                Box::new(FoldedActiveProcess::new(children_accessor())),
                Box::new(UnlockProcess {
                    properties: Vec::new(),
                }),
                Box::new(WaitForTransitionProcess),
            ]))
        })
        .with_deactivating(|| {
            Box::new(CompositeProcess::new(vec![
                Box::new(FoldedDeactivatingProcess::new(children_accessor())),
                Box::new(LockProcess::on_end()),
            ]))
        })
        .with_aborting(|| {
            Box::new(CompositeProcess::new(vec![
                Box::new(LockProcess::on_start()),
                Box::new(ParallelAbortProcess::new(children_accessor())),
            ]))
        })
}

/// A single authored step: behaviors plus transitions, sequenced by a group.
pub struct Step {
    entity: Entity<StepData>,
}

impl Step {
    /// Create an empty step with a fresh id.
    pub fn new(name: &str) -> Self {
        Self {
            entity: Entity::new(
                name,
                StepData {
                    name: name.to_string(),
                    description: String::new(),
                    id: StepId::new(),
                    behaviors: Vec::new(),
                    transitions: Vec::new(),
                    manual_unlock: Vec::new(),
                    lock_handling: crate::step::lock::shared(NonLockingStepLockHandling),
                },
                step_factories(),
            ),
        }
    }

    /// Use a persisted id instead of the freshly minted one.
    pub fn with_id(mut self, id: StepId) -> Self {
        self.entity.data_mut().id = id;
        self
    }

    /// Set the authored description.
    pub fn with_description(mut self, description: &str) -> Self {
        self.entity.data_mut().description = description.to_string();
        self
    }

    /// Add a behavior child.
    pub fn with_behavior(mut self, behavior: Box<dyn EntityNode>) -> Self {
        self.entity.data_mut().behaviors.push(behavior);
        self
    }

    /// Add an outgoing transition.
    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.entity.data_mut().transitions.push(transition);
        self
    }

    /// Flag a property for manual unlock while this step is active.
    pub fn with_manual_unlock(mut self, reference: LockablePropertyReference) -> Self {
        self.entity.data_mut().manual_unlock.push(reference);
        self
    }

    /// Use the given shared lock handling instead of the non-locking default.
    pub fn with_lock_handling(mut self, handling: SharedLockHandling) -> Self {
        self.entity.data_mut().lock_handling = handling;
        self
    }

    /// Subscribe this step's lifecycle to a stage-event channel.
    pub fn set_event_channel(&mut self, tx: mpsc::Sender<StageEvent>) {
        self.entity.set_event_channel(tx);
    }

    /// The step's data.
    pub fn data(&self) -> &StepData {
        self.entity.data()
    }

    /// The step's data, exclusively.
    pub fn data_mut(&mut self) -> &mut StepData {
        self.entity.data_mut()
    }
}

impl EntityNode for Step {
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

impl StepEntity for Step {
    fn id(&self) -> StepId {
        self.entity.data().id
    }

    fn outgoing_targets(&self) -> Vec<Option<StepId>> {
        self.entity
            .data()
            .transitions
            .iter()
            .map(|t| t.target())
            .collect()
    }

    fn completed_transition_target(&self) -> Option<Option<StepId>> {
        self.entity
            .data()
            .completed_transition()
            .map(|t| t.target())
    }

    fn autocomplete_transition_to(&mut self, target: Option<StepId>) {
        let transitions = &mut self.entity.data_mut().transitions;
        if let Some(transition) = transitions
            .iter_mut()
            .find(|t| t.target() == target && !t.is_completed())
        {
            transition.autocomplete();
        } else if let Some(transition) = transitions.iter_mut().find(|t| !t.is_completed()) {
            transition.autocomplete();
        }
    }
}
