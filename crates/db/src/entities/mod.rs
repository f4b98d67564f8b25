//! Database entities.

pub mod worker_task;

pub use worker_task::Entity as WorkerTask;
