//! Asynchronous task processing for pelago.
//!
//! This crate provides the in-process message pipelines that carry out every
//! side effect of a user action or an incoming federation activity:
//!
//! - **Task queues**: unbounded FIFO queues, safe for concurrent producers
//!   and consumers
//! - **Worker pools**: fixed-concurrency consumption loops with graceful,
//!   bounded-drain shutdown
//! - **Scheduler**: recurring maintenance jobs anchored to a start time
//! - **Jobs**: the message types of each pipeline
//! - **Workers**: the delivery and web push processing functions
//!
//! Backpressure strategy: queues never block or drop on push; the worker
//! count bounds resource usage, and backlog depth is surfaced to operators
//! through metrics rather than by blocking producers.

pub mod jobs;
pub mod pool;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod workers;

pub use jobs::{ClientJob, DeliverJob, InboxJob, OneshotJob, WebPushJob};
pub use pool::WorkerPool;
pub use queue::TaskQueue;
pub use retry::RetryConfig;
pub use scheduler::Scheduler;
pub use workers::{DeliverContext, RequestSigner, WebPushContext, Workers};
