//! Scheduler layer for the controller
//!
//! A deduplicating work queue fed by a periodic resync, drained by a pool of
//! reconcile workers.

pub mod poller;
pub mod queue;
pub mod worker;

pub use poller::ResyncPoller;
pub use queue::{WorkItem, WorkQueue};
pub use worker::WorkerPool;
