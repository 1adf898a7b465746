//! Service Module
//!
//! Business logic layer for the orchestrator: the pipeline state machine,
//! live log fan-out and the per-target session registry.

pub mod architecture;
pub mod log;
pub mod pipeline;
pub mod registry;

pub use registry::SessionRegistry;
