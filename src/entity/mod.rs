//! Generic entity composition.
//!
//! An entity is any node in a procedure tree: it owns exactly one lifecycle
//! (1:1, created at construction, never replaced) and typed data. Data that
//! exposes children turns the entity into a parent; `update` and `configure`
//! recurse over the tree so a process, its chapters, steps and behaviors all
//! advance as one unit per engine tick.

mod data;
mod folded;
mod node;

pub use data::{Children, EntityData, Mode};
pub use folded::{
    ChildAccessor, FoldedActivatingProcess, FoldedActiveProcess, FoldedDeactivatingProcess,
    ParallelAbortProcess,
};
pub use node::{Entity, EntityNode};
