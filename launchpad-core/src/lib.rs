//! Launchpad Core
//!
//! Core types and abstractions for the Launchpad deployment orchestrator.
//!
//! This crate contains:
//! - Domain types: Core business entities (stages, pipeline runs, log events, targets)
//! - DTOs: Data transfer objects exchanged between the orchestrator and its clients

pub mod domain;
pub mod dto;
