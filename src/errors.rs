//! Typed error hierarchy for the lifecycle engine.
//!
//! Two top-level enums cover the two failure domains:
//! - `StateError` — lifecycle protocol violations (caller bugs, never swallowed)
//! - `GraphError` — step-graph construction and path-finding failures
//!
//! Runtime failures inside leaf stage processes are deliberately *not* part of
//! this hierarchy: they travel as `anyhow::Error`, get logged at the `LifeCycle`
//! boundary and never propagate (see `lifecycle::machine`).

use crate::lifecycle::Stage;
use thiserror::Error;

/// Errors from illegal lifecycle operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("'{operation}' is not allowed on '{entity}' while in stage {stage:?}")]
    InvalidTransition {
        entity: String,
        operation: &'static str,
        stage: Stage,
    },
}

impl StateError {
    /// Build an invalid-transition error for the given operation.
    pub fn invalid(entity: &str, operation: &'static str, stage: Stage) -> Self {
        Self::InvalidTransition {
            entity: entity.to_string(),
            operation,
            stage,
        }
    }
}

/// Errors from the step-graph subsystem.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Duplicate step id {id} in group '{group}'")]
    DuplicateStep { group: String, id: uuid::Uuid },

    #[error("Transition in step '{step}' targets unknown step {target}")]
    UnknownStep { step: String, target: uuid::Uuid },

    #[error("Group '{group}' has a first step {id} that is not a member")]
    UnknownFirstStep { group: String, id: uuid::Uuid },

    #[error("No path from step '{from}' to the end of group '{group}'")]
    NoPathToEnd { group: String, from: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_error_carries_operation_and_stage() {
        let err = StateError::invalid("step A", "activate", Stage::Active);
        match &err {
            StateError::InvalidTransition {
                entity,
                operation,
                stage,
            } => {
                assert_eq!(entity, "step A");
                assert_eq!(*operation, "activate");
                assert_eq!(*stage, Stage::Active);
            }
        }
        assert!(err.to_string().contains("activate"));
        assert!(err.to_string().contains("step A"));
    }

    #[test]
    fn graph_error_no_path_names_group_and_step() {
        let err = GraphError::NoPathToEnd {
            group: "chapter 1".to_string(),
            from: "step B".to_string(),
        };
        assert!(err.to_string().contains("chapter 1"));
        assert!(err.to_string().contains("step B"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        let state_err = StateError::invalid("x", "abort", Stage::Inactive);
        assert_std_error(&state_err);
        let graph_err = GraphError::NoPathToEnd {
            group: "g".into(),
            from: "s".into(),
        };
        assert_std_error(&graph_err);
    }
}
