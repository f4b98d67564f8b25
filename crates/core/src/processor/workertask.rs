//! Durable queue persistence.
//!
//! On shutdown, whatever the pools did not get to is serialized to the
//! `worker_task` table; on the next start it is deserialized and pushed
//! back onto the matching queues before external traffic is admitted.
//! Recovery is at-least-once: rows are only deleted after a successful
//! re-push, and ordering across a restart is best-effort.

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, info};

use pelago_common::{AppError, AppResult, get_metrics};
use pelago_db::entities::worker_task::{self, WorkerType};
use pelago_db::repositories::NewWorkerTask;
use pelago_queue::TaskQueue;

use super::Processor;

impl Processor {
    /// Recover all persisted worker tasks from the database and push them
    /// to their worker queues. Rows that fail to parse are logged, counted,
    /// and left in place for inspection; successfully recovered rows are
    /// deleted.
    ///
    /// Must run after the pools are wired but before external traffic is
    /// admitted, so recovered messages sit at the front of the queues.
    pub async fn fill_worker_queues(&self) -> AppResult<()> {
        // Returned in insertion order.
        let tasks = self.state().tasks.get_worker_tasks().await?;

        let mut delivery = 0u64;
        let mut federator = 0u64;
        let mut client = 0u64;
        let mut errors = 0u64;
        let mut recovered = Vec::new();

        for task in tasks {
            let counter = match task.worker_type {
                WorkerType::Delivery => {
                    push_recovered(self.state().workers.delivery.queue(), &task)
                        .map(|()| &mut delivery)
                }
                WorkerType::Federator => {
                    push_recovered(self.state().workers.federator.queue(), &task)
                        .map(|()| &mut federator)
                }
                WorkerType::Client => {
                    push_recovered(self.state().workers.client.queue(), &task)
                        .map(|()| &mut client)
                }
            };

            match counter {
                Ok(counter) => {
                    *counter += 1;
                    recovered.push(task.id);
                }
                Err(e) => {
                    error!(task = task.id, error = %e, "Error recovering task");
                    errors += 1;
                }
            }
        }

        // Only rows that made it back onto a queue leave the database.
        for id in recovered {
            if let Err(e) = self.state().tasks.delete_worker_task(id).await {
                error!(task = id, error = %e, "Error deleting recovered task");
            }
        }

        let total = delivery + federator + client;
        get_metrics().record_tasks_recovered(total);
        info!(delivery, federator, client, errors, "Recovered queued tasks");

        Ok(())
    }

    /// Pop every queued-but-undispatched message from the persistable
    /// pipelines, serialize them, and write them to the database. Runs only
    /// after all pools are fully stopped so there are no concurrent pops.
    ///
    /// An empty backlog performs no storage write.
    pub async fn persist_worker_queues(&self) -> AppResult<()> {
        let mut tasks = Vec::new();

        let delivery = drain_queue(
            self.state().workers.delivery.queue(),
            WorkerType::Delivery,
            &mut tasks,
        );
        let federator = drain_queue(
            self.state().workers.federator.queue(),
            WorkerType::Federator,
            &mut tasks,
        );
        let client = drain_queue(
            self.state().workers.client.queue(),
            WorkerType::Client,
            &mut tasks,
        );

        if tasks.is_empty() {
            info!("No queued tasks to persist");
            return Ok(());
        }

        let total = tasks.len() as u64;
        self.state().tasks.put_worker_tasks(tasks).await?;

        get_metrics().record_tasks_persisted(total);
        info!(delivery, federator, client, "Persisted queued tasks");

        Ok(())
    }
}

/// Deserialize one persisted row and push it onto `queue`.
fn push_recovered<T: DeserializeOwned>(
    queue: &TaskQueue<T>,
    task: &worker_task::Model,
) -> AppResult<()> {
    let msg: T = serde_json::from_value(task.task_data.clone())
        .map_err(|e| AppError::Queue(format!("deserializing task {}: {e}", task.id)))?;
    queue.push(msg);
    Ok(())
}

/// Drain everything still queued into `tasks`, returning how many messages
/// this queue contributed. Serialization failures are logged and the
/// message is dropped; better partial persistence than none.
fn drain_queue<T: Serialize + std::fmt::Debug>(
    queue: &TaskQueue<T>,
    worker_type: WorkerType,
    tasks: &mut Vec<NewWorkerTask>,
) -> u64 {
    let mut count = 0u64;

    while let Some(msg) = queue.try_pop() {
        match serde_json::to_value(&msg) {
            Ok(task_data) => {
                tasks.push(NewWorkerTask {
                    worker_type,
                    task_data,
                    created_at: Utc::now(),
                });
                count += 1;
            }
            Err(e) => {
                error!(?worker_type, message = ?msg, error = %e, "Error serializing task");
            }
        }
    }

    count
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::testing::{InMemoryTaskStore, in_memory_store};
    use super::*;
    use crate::state::State;
    use pelago_common::config::WorkersConfig;
    use pelago_db::repositories::WorkerTaskStore;
    use pelago_queue::jobs::ap;
    use pelago_queue::{ClientJob, DeliverJob, Workers};
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    fn test_processor() -> (Arc<Processor>, Arc<InMemoryTaskStore>) {
        let workers = Arc::new(Workers::new(&WorkersConfig::default()));
        let store = in_memory_store();
        let state = Arc::new(State::new(workers, store.clone()));
        (
            Arc::new(Processor::new(state, reqwest::Client::new())),
            store,
        )
    }

    fn test_deliver_job(n: u32) -> DeliverJob {
        DeliverJob::new(
            None,
            format!("https://remote.example/inbox/{n}"),
            serde_json::json!({"type": "Create", "n": n}),
        )
    }

    #[tokio::test]
    async fn test_persist_then_fill_round_trip() {
        let (processor, store) = test_processor();
        let workers = &processor.state().workers;

        // Pools never started: pushes stay queued.
        workers.delivery.queue().push(test_deliver_job(1));
        workers.delivery.queue().push(test_deliver_job(2));
        workers.client.queue().push(ClientJob::new(
            ap::ACTIVITY_CREATE.to_string(),
            ap::OBJECT_NOTE.to_string(),
            serde_json::json!({"content": "hi"}),
        ));

        processor.persist_worker_queues().await.unwrap();

        // Queues drained into storage.
        assert!(workers.delivery.queue().is_empty());
        assert!(workers.client.queue().is_empty());
        assert_eq!(store.rows().len(), 3);

        processor.fill_worker_queues().await.unwrap();

        // Everything back in memory, storage cleared.
        assert_eq!(workers.delivery.queue().len(), 2);
        assert_eq!(workers.client.queue().len(), 1);
        assert!(store.rows().is_empty());

        let first = workers.delivery.queue().try_pop().unwrap();
        let second = workers.delivery.queue().try_pop().unwrap();
        let inboxes: std::collections::HashSet<_> =
            [first.inbox, second.inbox].into_iter().collect();
        assert!(inboxes.contains("https://remote.example/inbox/1"));
        assert!(inboxes.contains("https://remote.example/inbox/2"));
    }

    #[tokio::test]
    async fn test_persist_empty_queues_writes_nothing() {
        let (processor, store) = test_processor();

        processor.persist_worker_queues().await.unwrap();

        assert_eq!(store.put_calls.load(Ordering::SeqCst), 0);
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn test_fill_skips_corrupt_rows() {
        let (processor, store) = test_processor();

        store
            .put_worker_tasks(vec![
                NewWorkerTask {
                    worker_type: WorkerType::Delivery,
                    task_data: serde_json::json!({"not": "a deliver job"}),
                    created_at: Utc::now(),
                },
                NewWorkerTask {
                    worker_type: WorkerType::Delivery,
                    task_data: serde_json::to_value(test_deliver_job(7)).unwrap(),
                    created_at: Utc::now(),
                },
            ])
            .await
            .unwrap();

        processor.fill_worker_queues().await.unwrap();

        // The parseable row is recovered and deleted; the corrupt row stays
        // behind for inspection.
        assert_eq!(processor.state().workers.delivery.queue().len(), 1);
        assert_eq!(store.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_delivery_attempts_survive_round_trip() {
        let (processor, store) = test_processor();
        let workers = &processor.state().workers;

        let mut job = test_deliver_job(1);
        job.attempts = 4;
        workers.delivery.queue().push(job);

        processor.persist_worker_queues().await.unwrap();
        assert_eq!(store.rows().len(), 1);
        processor.fill_worker_queues().await.unwrap();

        let recovered = workers.delivery.queue().try_pop().unwrap();
        assert_eq!(recovered.attempts, 4);
    }
}
