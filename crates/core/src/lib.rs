//! Core processing for pelago.
//!
//! The consumer side of the task-processing subsystem:
//!
//! - **State**: the single composed object holding workers, caches, and the
//!   durable task store, constructed in `main` and passed by reference
//! - **Processor**: routes client and federator messages to their side
//!   effects, and owns the durable queue persist/fill contract
//! - **Maintenance**: narrow interfaces for the recurring scheduler's
//!   periodic jobs

pub mod maintenance;
pub mod processor;
pub mod state;

pub use maintenance::{MaintenanceStore, PollExpiry, ScheduledStatus};
pub use processor::Processor;
pub use state::{Caches, State};
