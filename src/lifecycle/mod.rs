//! Per-entity lifecycle execution.
//!
//! Every entity in a procedure tree progresses through the same five stages
//! (`Inactive -> Activating -> Active -> Deactivating -> Inactive`, with
//! `Aborting` as the escape hatch). This module provides the three pieces
//! that make that uniform:
//!
//! 1. **Stage** - the closed stage enumeration and change events
//! 2. **StageProcess** - the resumable unit of work bound to one stage
//! 3. **LifeCycle** - the state machine that drives the current process one
//!    tick at a time and owns fast-forward and abort semantics

mod machine;
mod process;
mod stage;

pub use machine::LifeCycle;
pub use process::{CompositeProcess, EmptyProcess, Factory, ProcessFactories, Progress, StageProcess};
pub use stage::{FastForwardFlags, Stage, StageEvent};
