//! Steps and their collaborators: transitions, conditions and lockable
//! property handling.

mod lock;
mod step;
mod transition;

pub use lock::{
    LockablePropertyReference, NonLockingStepLockHandling, SharedLockHandling, StepLockHandling,
    shared,
};
pub use step::{Step, StepData, StepEntity, StepId};
pub use transition::{Condition, Transition, TransitionData};
