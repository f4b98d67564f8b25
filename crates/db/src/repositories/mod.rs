//! Database repositories.

pub mod worker_task;

pub use worker_task::{NewWorkerTask, WorkerTaskRepository, WorkerTaskStore};
