//! Core domain types
//!
//! This module contains the core domain structures used across Launchpad crates.
//! The orchestrator owns and mutates them; the client and CLI only read
//! serialized snapshots.

pub mod context;
pub mod log;
pub mod run;
pub mod stage;
pub mod target;
