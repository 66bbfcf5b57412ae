//! Lifecycle stages and stage-change events.

use serde::{Deserialize, Serialize};

/// Where an entity is in its life.
///
/// `Inactive` and `Active` are stable; the three transient stages always
/// resolve to one of the stable ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Not running; the only stage from which activation is legal
    #[default]
    Inactive,
    /// Running the activating process, resolves to Active
    Activating,
    /// Fully activated and running
    Active,
    /// Running the deactivating process, resolves to Inactive
    Deactivating,
    /// Running the aborting process, resolves to Inactive
    Aborting,
}

impl Stage {
    /// Check if the stage is stable (no pending transition).
    pub fn is_stable(&self) -> bool {
        matches!(self, Self::Inactive | Self::Active)
    }

    /// Check if the stage is transient.
    pub fn is_transient(&self) -> bool {
        !self.is_stable()
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::Inactive => 0,
            Self::Activating => 1,
            Self::Active => 2,
            Self::Deactivating => 3,
            Self::Aborting => 4,
        }
    }
}

/// Notification emitted on every stage change of a lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    /// Display name of the entity that changed stage.
    pub entity: String,
    /// The stage that was just entered.
    pub stage: Stage,
}

/// Per-stage "fast-forward when reached" flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct FastForwardFlags([bool; 5]);

impl FastForwardFlags {
    /// Check whether the given stage is marked.
    pub fn is_marked(&self, stage: Stage) -> bool {
        self.0[stage.index()]
    }

    /// Mark the given stage.
    pub fn mark(&mut self, stage: Stage) {
        self.0[stage.index()] = true;
    }

    /// Clear the mark for the given stage.
    pub fn clear(&mut self, stage: Stage) {
        self.0[stage.index()] = false;
    }
}
