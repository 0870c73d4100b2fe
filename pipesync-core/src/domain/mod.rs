//! Core domain types
//!
//! Control-plane resources are mirrored with their wire shape (camelCase JSON)
//! so the REST client can deserialize them directly. Execution-engine objects
//! are modelled as plain snapshots: a value read from the engine is only as
//! fresh as the lookup that produced it.

pub mod binding;
pub mod identity;
pub mod job;
pub mod meta;
pub mod pipeline;
pub mod pipeline_config;
pub mod run;
