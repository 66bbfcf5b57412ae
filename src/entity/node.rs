//! Generic entity: a lifecycle plus typed data, composed recursively.

use crate::entity::data::{Children, EntityData, Mode};
use crate::errors::StateError;
use crate::lifecycle::{LifeCycle, ProcessFactories, Stage, StageEvent};
use std::sync::mpsc;

/// Object-safe view of any node in a procedure tree.
///
/// Heterogeneous children (behaviors, transitions, nested groups) are held
/// behind this trait; owners drive them without knowing their data type.
pub trait EntityNode {
    /// Display name used in events and log breadcrumbs.
    fn display_name(&self) -> &str;

    /// The node's current lifecycle stage.
    fn stage(&self) -> Stage;

    /// Begin activating. Only legal from `Inactive`.
    fn activate(&mut self) -> Result<(), StateError>;

    /// Begin (or defer) deactivating.
    fn deactivate(&mut self) -> Result<(), StateError>;

    /// Begin aborting.
    fn abort(&mut self) -> Result<(), StateError>;

    /// Advance the node's own lifecycle by one tick, then propagate into
    /// children according to the data's child layout.
    fn update(&mut self);

    /// Request "skip to the end of the whole activity".
    fn mark_to_fast_forward(&mut self);

    /// Mark one stage to fast-forward when reached.
    fn mark_to_fast_forward_stage(&mut self, stage: Stage);

    /// Apply a configuration mode, children first, self last.
    fn configure(&mut self, mode: &Mode);

    /// Set the ancestor name used in log breadcrumbs.
    fn set_parent_name(&mut self, parent: &str);
}

/// Generic owner of a [`LifeCycle`] and typed data.
///
/// The lifecycle is created at construction and never replaced; the data's
/// [`Children`] layout decides how `update` propagates into the tree.
pub struct Entity<D: EntityData> {
    life_cycle: LifeCycle<D>,
    data: D,
}

impl<D: EntityData> Entity<D> {
    /// Create an entity with the given data and stage-process factories.
    pub fn new(name: &str, data: D, factories: ProcessFactories<D>) -> Self {
        Self {
            life_cycle: LifeCycle::new(name, factories),
            data,
        }
    }

    /// Subscribe this entity's lifecycle to a stage-event channel.
    pub fn set_event_channel(&mut self, tx: mpsc::Sender<StageEvent>) {
        self.life_cycle.set_event_channel(tx);
    }

    /// Shared access to the data.
    pub fn data(&self) -> &D {
        &self.data
    }

    /// Exclusive access to the data.
    pub fn data_mut(&mut self) -> &mut D {
        &mut self.data
    }
}

impl<D: EntityData> EntityNode for Entity<D> {
    fn display_name(&self) -> &str {
        self.life_cycle.entity_name()
    }

    fn stage(&self) -> Stage {
        self.life_cycle.stage()
    }

    fn activate(&mut self) -> Result<(), StateError> {
        self.life_cycle.activate(&mut self.data)
    }

    fn deactivate(&mut self) -> Result<(), StateError> {
        self.life_cycle.deactivate(&mut self.data)
    }

    fn abort(&mut self) -> Result<(), StateError> {
        self.life_cycle.abort(&mut self.data)
    }

    fn update(&mut self) {
        // Own lifecycle first, child propagation second.
        self.life_cycle.update(&mut self.data);
        match self.data.children() {
            Children::Leaf => {}
            Children::Sequence { current } => {
                if let Some(child) = current {
                    child.update();
                }
            }
            Children::Collection(children) => {
                for child in children {
                    child.update();
                }
            }
        }
    }

    fn mark_to_fast_forward(&mut self) {
        self.life_cycle.mark_to_fast_forward(&mut self.data);
    }

    fn mark_to_fast_forward_stage(&mut self, stage: Stage) {
        self.life_cycle.mark_to_fast_forward_stage(stage, &mut self.data);
    }

    fn configure(&mut self, mode: &Mode) {
        let name = self.life_cycle.entity_name().to_string();
        for child in self.data.all_children() {
            child.set_parent_name(&name);
            child.configure(mode);
        }
        self.data.apply_mode(mode);
    }

    fn set_parent_name(&mut self, parent: &str) {
        self.life_cycle.set_parent_name(parent);
    }
}
