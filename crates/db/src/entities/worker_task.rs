//! Worker task entity.
//!
//! One row per queued-but-unprocessed message serialized at shutdown.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Which pipeline a persisted task belongs to.
///
/// Only the pipelines whose messages are serializable appear here; the
/// dereference, processing and web push pipelines re-derive their work
/// after a restart instead of persisting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "i16", db_type = "SmallInteger")]
pub enum WorkerType {
    /// Outbound delivery pipeline.
    #[sea_orm(num_value = 1)]
    Delivery,
    /// Inbound federation side-effect pipeline.
    #[sea_orm(num_value = 2)]
    Federator,
    /// Client API side-effect pipeline.
    #[sea_orm(num_value = 3)]
    Client,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "worker_task")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Pipeline the task is reloaded into.
    pub worker_type: WorkerType,

    /// Serialized message.
    #[sea_orm(column_type = "JsonBinary")]
    pub task_data: Json,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
