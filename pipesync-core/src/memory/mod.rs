//! In-process implementations of the engine and control-plane seams
//!
//! Used by the reconciler's tests and by the controller when no engine URL is
//! configured. Both keep every mutation visible for inspection.

mod control_plane;
mod engine;

pub use control_plane::{InMemoryControlPlane, RecordedPatch};
pub use engine::{EngineEvent, FailPoint, InMemoryEngine};
