use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per drop, keyed by the 22 character base62 id
        manager
            .create_table(
                Table::create()
                    .table(Drops::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Drops::Id)
                            .string_len(22)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Drops::Status).string_len(16).not_null())
                    .col(ColumnDef::new(Drops::AmountMsat).big_integer().not_null())
                    .col(ColumnDef::new(Drops::Expiry).big_integer().not_null())
                    .col(ColumnDef::new(Drops::Message).text().null())
                    .col(
                        ColumnDef::new(Drops::ShowInGallery)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Drops::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(Drops::ClaimedAt).big_integer().null())
                    .col(
                        ColumnDef::new(Drops::ViewCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Drops::LastViewReset)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Secondary status index for sweeps and gallery scans
        manager
            .create_index(
                Index::create()
                    .name("idx_drops_status")
                    .table(Drops::Table)
                    .col(Drops::Status)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Drops::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Drops {
    Table,
    Id,
    Status,
    AmountMsat,
    Expiry,
    Message,
    ShowInGallery,
    CreatedAt,
    ClaimedAt,
    ViewCount,
    LastViewReset,
}
