//! Data Transfer Objects for the orchestrator HTTP API
//!
//! DTOs are the request/response bodies and stream frames exchanged between
//! the orchestrator and its clients (CLI, dashboard).

pub mod deploy;
pub mod stream;
