//! # sq-protocol
//!
//! Core protocol definitions and data models for solverq.
//!
//! This crate defines all shared data structures used for:
//! - Task records and the status lifecycle they move through
//! - Engine configuration
//! - Queue statistics snapshots
//! - Asynchronous messaging between the engine and its callers
//!
//! ## Modules
//!
//! - [`task_models`]: Task record, status, and priority
//! - [`config_models`]: Engine configuration document
//! - [`stats_models`]: Resource gauges and stats snapshots
//! - [`ipc`]: Operations and Events for caller-engine communication
//!
//! ## Design Principles
//!
//! - Minimal dependencies: only serde, uuid, and chrono
//! - Independent compilation: no dependencies on other solverq crates

pub mod config_models;
pub mod ipc;
pub mod stats_models;
pub mod task_models;

// Re-export all public types for convenience
pub use config_models::*;
pub use ipc::*;
pub use stats_models::*;
pub use task_models::*;
