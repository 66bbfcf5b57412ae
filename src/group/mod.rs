//! Chapters: graphs of steps walked along completed transitions.

mod group;
mod pathfind;

pub use group::{LinkedTransition, StepGroup, StepGroupData};
