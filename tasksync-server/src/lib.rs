//! `TaskSync` reference server library.
//!
//! Exposes the task store and HTTP routes for use in tests and embedding.
//! The server is the sole version authority: every accepted write bumps
//! the task's version stamp, and writes carrying a stale stamp are
//! rejected with status 409.

pub mod config;
pub mod routes;
pub mod store;
