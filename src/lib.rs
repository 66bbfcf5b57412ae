//! Hierarchical lifecycle engine for step-based interactive procedures.
//!
//! Every building block of a procedure is an entity with a five-stage
//! lifecycle (`Inactive`, `Activating`, `Active`, `Deactivating`,
//! `Aborting`). Entities compose recursively: transitions and behaviors live
//! inside steps, steps inside groups, and groups inside other groups. An
//! external host pumps the root entity once per frame; everything inside
//! advances cooperatively, one suspension point per tick.

pub mod entity;
pub mod errors;
pub mod group;
pub mod lifecycle;
pub mod step;

pub use entity::{Entity, EntityData, EntityNode, Mode};
pub use errors::{GraphError, StateError};
pub use group::StepGroup;
pub use lifecycle::{Progress, Stage, StageEvent, StageProcess};
pub use step::{Condition, Step, StepEntity, StepId, Transition};
