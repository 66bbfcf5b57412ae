//! Lockable-property bookkeeping at stage boundaries.
//!
//! Lockable scene-object properties are the one cross-entity shared resource.
//! The engine only guarantees the unlock/lock calls happen exactly once per
//! stage occupancy (Active entry unlocks, Deactivating exit locks); any
//! refcounting across concurrently active steps lives behind the
//! [`StepLockHandling`] trait.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// An already-resolved reference to a lockable scene-object property.
///
/// The engine never resolves names or GUIDs itself; references arrive
/// resolved from the scene layer and are treated as opaque handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockablePropertyReference {
    /// The scene object carrying the property.
    pub scene_object: Uuid,
    /// The property name on that object.
    pub property: String,
}

impl LockablePropertyReference {
    /// Create a reference to a property on the given scene object.
    pub fn new(scene_object: Uuid, property: &str) -> Self {
        Self {
            scene_object,
            property: property.to_string(),
        }
    }
}

/// External collaborator mutating lockable properties at stage boundaries.
pub trait StepLockHandling: Send {
    /// Called exactly once per Active-stage entry of a step.
    fn unlock(&mut self, step_name: &str, properties: &[LockablePropertyReference]);

    /// Called exactly once per Deactivating-stage exit (or Aborting entry) of
    /// a step.
    fn lock(&mut self, step_name: &str, properties: &[LockablePropertyReference]);
}

/// Lock handling shared across all steps of a procedure.
pub type SharedLockHandling = Arc<Mutex<dyn StepLockHandling>>;

/// Default handler for trees running without a scene layer.
#[derive(Debug, Default)]
pub struct NonLockingStepLockHandling;

impl StepLockHandling for NonLockingStepLockHandling {
    fn unlock(&mut self, _step_name: &str, _properties: &[LockablePropertyReference]) {}

    fn lock(&mut self, _step_name: &str, _properties: &[LockablePropertyReference]) {}
}

/// Wrap a handler for sharing across a procedure tree.
pub fn shared(handling: impl StepLockHandling + 'static) -> SharedLockHandling {
    Arc::new(Mutex::new(handling))
}
