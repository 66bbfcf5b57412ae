//! Data contracts that make an entity a parent.
//!
//! Whether an entity is a leaf, a sequence (one active child at a time) or a
//! collection (all children updated every tick) is a property of its data
//! type, resolved once at construction through [`Children`] rather than by
//! runtime type tests. A node is exactly one of the three shapes, never both.

use crate::entity::node::EntityNode;
use serde::{Deserialize, Serialize};

/// A named configuration mode applied to a whole entity tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    /// Human-readable mode name.
    pub name: String,
}

impl Mode {
    /// Create a mode with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Self::new("default")
    }
}

/// The child layout of an entity's data, as seen by update propagation.
pub enum Children<'a> {
    /// No children.
    Leaf,
    /// Ordered sequence with at most one current child; only it is updated.
    Sequence {
        current: Option<&'a mut dyn EntityNode>,
    },
    /// Unordered set; every child is updated each tick.
    Collection(Vec<&'a mut dyn EntityNode>),
}

/// Typed data owned by an entity.
pub trait EntityData {
    /// The child layout used by update propagation.
    fn children(&mut self) -> Children<'_> {
        Children::Leaf
    }

    /// Every child, regardless of layout; used by configure recursion.
    fn all_children(&mut self) -> Vec<&mut dyn EntityNode> {
        Vec::new()
    }

    /// Hook for mode-aware data; the active mode is handed down after all
    /// children were configured.
    fn apply_mode(&mut self, _mode: &Mode) {}
}

/// Leaf data for entities that carry no payload of their own.
impl EntityData for () {}
