//! `TaskSync` — task-management client core with optimistic concurrency
//! control and conflict resolution.

pub mod api;
pub mod cache;
pub mod config;
pub mod conflict;
pub mod identity;
