//! Shared data model and wire body definitions for `TaskSync`.

pub mod api;
pub mod patch;
pub mod task;
