//! Worker task repository.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, Set};

use crate::entities::worker_task::{self, WorkerType};
use crate::entities::WorkerTask;
use pelago_common::{AppError, AppResult};

/// A task about to be persisted; the row ID is assigned by the database.
#[derive(Debug, Clone)]
pub struct NewWorkerTask {
    /// Pipeline the task belongs to.
    pub worker_type: WorkerType,
    /// Serialized message.
    pub task_data: serde_json::Value,
    /// When the task was drained from its queue.
    pub created_at: DateTime<Utc>,
}

/// Durable persistence boundary for queued-but-unprocessed messages.
///
/// The processor drains worker queues through this on shutdown and refills
/// them through it on startup.
#[async_trait]
pub trait WorkerTaskStore: Send + Sync {
    /// All persisted tasks, in insertion order.
    async fn get_worker_tasks(&self) -> AppResult<Vec<worker_task::Model>>;

    /// Persist serialized tasks. An empty batch must not touch storage.
    async fn put_worker_tasks(&self, tasks: Vec<NewWorkerTask>) -> AppResult<()>;

    /// Remove one recovered task.
    async fn delete_worker_task(&self, id: i64) -> AppResult<()>;
}

/// Worker task repository for database operations.
#[derive(Clone)]
pub struct WorkerTaskRepository {
    db: Arc<DatabaseConnection>,
}

impl WorkerTaskRepository {
    /// Create a new worker task repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WorkerTaskStore for WorkerTaskRepository {
    async fn get_worker_tasks(&self) -> AppResult<Vec<worker_task::Model>> {
        WorkerTask::find()
            .order_by_asc(worker_task::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn put_worker_tasks(&self, tasks: Vec<NewWorkerTask>) -> AppResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        for task in tasks {
            let model = worker_task::ActiveModel {
                worker_type: Set(task.worker_type),
                task_data: Set(task.task_data),
                created_at: Set(task.created_at.into()),
                ..Default::default()
            };
            model
                .insert(self.db.as_ref())
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }
        Ok(())
    }

    async fn delete_worker_task(&self, id: i64) -> AppResult<()> {
        WorkerTask::delete_by_id(id)
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn task_row(id: i64, worker_type: WorkerType) -> worker_task::Model {
        worker_task::Model {
            id,
            worker_type,
            task_data: serde_json::json!({"inbox": "https://remote.example/inbox"}),
            created_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_get_worker_tasks_ordered() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![
                task_row(1, WorkerType::Delivery),
                task_row(2, WorkerType::Client),
            ]])
            .into_connection();
        let repo = WorkerTaskRepository::new(Arc::new(db));

        let tasks = repo.get_worker_tasks().await.unwrap();

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, 1);
        assert_eq!(tasks[1].worker_type, WorkerType::Client);
    }

    #[tokio::test]
    async fn test_put_empty_batch_skips_storage() {
        // No results queued: any query would make the mock error out.
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let repo = WorkerTaskRepository::new(Arc::new(db));

        repo.put_worker_tasks(Vec::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_worker_task() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let repo = WorkerTaskRepository::new(Arc::new(db));

        repo.delete_worker_task(1).await.unwrap();
    }
}
