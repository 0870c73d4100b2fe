//! Pipesync Core
//!
//! Core types and abstractions for the pipesync reconciliation system.
//!
//! This crate contains:
//! - Domain types: control-plane resources (PipelineConfig, Pipeline, JenkinsBinding)
//!   and execution-engine objects (folders, jobs, runs, queue items)
//! - Naming: pure identity mapping between the two systems
//! - Seams: the `ExecutionEngine` and `ControlPlane` traits
//! - XML: escaping and stamp extraction for the engine's exchange format
//! - Memory: in-process implementations of both seams for tests and dry runs

pub mod control_plane;
pub mod domain;
pub mod engine;
pub mod error;
pub mod memory;
pub mod naming;
pub mod xml;

pub use control_plane::{ControlPlane, ResourceKind};
pub use domain::identity::NamespaceName;
pub use engine::ExecutionEngine;
pub use error::{ApiError, EngineError, Result, SyncError};
