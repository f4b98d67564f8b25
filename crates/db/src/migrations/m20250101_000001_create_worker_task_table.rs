//! Create worker task table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WorkerTask::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkerTask::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WorkerTask::WorkerType)
                            .small_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WorkerTask::TaskData)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WorkerTask::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WorkerTask::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WorkerTask {
    Table,
    Id,
    WorkerType,
    TaskData,
    CreatedAt,
}
