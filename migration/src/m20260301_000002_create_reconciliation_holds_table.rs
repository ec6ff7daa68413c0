use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Outlives the process so a restart cannot release a held drop
        manager
            .create_table(
                Table::create()
                    .table(ReconciliationHolds::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReconciliationHolds::DropId)
                            .string_len(22)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ReconciliationHolds::Kind)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReconciliationHolds::Reason)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReconciliationHolds::PaymentRequest)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReconciliationHolds::PaymentHash)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReconciliationHolds::Detail)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReconciliationHolds::RecordedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ReconciliationHolds::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ReconciliationHolds {
    Table,
    DropId,
    Kind,
    Reason,
    PaymentRequest,
    PaymentHash,
    Detail,
    RecordedAt,
}
