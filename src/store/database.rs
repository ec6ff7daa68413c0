use std::convert::TryFrom;

use async_trait::async_trait;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

use super::{DropStore, StoreError, StoreResult};
use crate::drop_id::DropId;
use crate::entities::drop as drop_row;
use crate::entities::reconciliation_hold as hold_row;
use crate::lifecycle::{PayoutKind, ReconciliationEntry, ReconciliationReason};
use crate::models::drop::{Drop, DropStatus};

/// PostgreSQL-backed store. Every statement targets the primary key or the
/// status index, and a single-row read after an upsert sees the new row.
#[derive(Clone)]
pub struct DatabaseDropStore {
    database: DatabaseConnection,
}

impl DatabaseDropStore {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }
}

#[async_trait]
impl DropStore for DatabaseDropStore {
    async fn put(&self, drop: &Drop) -> StoreResult<()> {
        let row = to_active_model(drop)?;
        drop_row::Entity::insert(row)
            .on_conflict(
                OnConflict::column(drop_row::Column::Id)
                    .update_columns([
                        drop_row::Column::Status,
                        drop_row::Column::AmountMsat,
                        drop_row::Column::Expiry,
                        drop_row::Column::Message,
                        drop_row::Column::ShowInGallery,
                        drop_row::Column::ClaimedAt,
                        drop_row::Column::ViewCount,
                        drop_row::Column::LastViewReset,
                    ])
                    .to_owned(),
            )
            .exec(&self.database)
            .await?;
        Ok(())
    }

    async fn get(&self, id: &DropId) -> StoreResult<Option<Drop>> {
        drop_row::Entity::find_by_id(id.as_str().to_string())
            .one(&self.database)
            .await?
            .map(from_model)
            .transpose()
    }

    async fn list_all(&self) -> StoreResult<Vec<Drop>> {
        drop_row::Entity::find()
            .order_by_desc(drop_row::Column::CreatedAt)
            .all(&self.database)
            .await?
            .into_iter()
            .map(from_model)
            .collect()
    }

    async fn delete(&self, id: &DropId) -> StoreResult<()> {
        drop_row::Entity::delete_by_id(id.as_str().to_string())
            .exec(&self.database)
            .await?;
        Ok(())
    }

    async fn update_view_counters(
        &self,
        id: &DropId,
        view_count: u32,
        last_view_reset: i64,
    ) -> StoreResult<()> {
        let view_count = i32::try_from(view_count).unwrap_or(i32::MAX);
        drop_row::Entity::update_many()
            .col_expr(drop_row::Column::ViewCount, Expr::value(view_count))
            .col_expr(drop_row::Column::LastViewReset, Expr::value(last_view_reset))
            .filter(drop_row::Column::Id.eq(id.as_str()))
            .exec(&self.database)
            .await?;
        Ok(())
    }

    async fn list_by_status(&self, status: DropStatus) -> StoreResult<Vec<Drop>> {
        drop_row::Entity::find()
            .filter(drop_row::Column::Status.eq(status.as_str()))
            .order_by_desc(drop_row::Column::CreatedAt)
            .all(&self.database)
            .await?
            .into_iter()
            .map(from_model)
            .collect()
    }

    async fn save_hold(&self, entry: &ReconciliationEntry) -> StoreResult<()> {
        hold_row::Entity::insert(hold_to_active_model(entry))
            .on_conflict(
                OnConflict::column(hold_row::Column::DropId)
                    .update_columns([
                        hold_row::Column::Kind,
                        hold_row::Column::Reason,
                        hold_row::Column::PaymentRequest,
                        hold_row::Column::PaymentHash,
                        hold_row::Column::Detail,
                        hold_row::Column::RecordedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.database)
            .await?;
        Ok(())
    }

    async fn delete_hold(&self, id: &DropId) -> StoreResult<()> {
        hold_row::Entity::delete_by_id(id.as_str().to_string())
            .exec(&self.database)
            .await?;
        Ok(())
    }

    async fn list_holds(&self) -> StoreResult<Vec<ReconciliationEntry>> {
        hold_row::Entity::find()
            .order_by_asc(hold_row::Column::RecordedAt)
            .all(&self.database)
            .await?
            .into_iter()
            .map(hold_from_model)
            .collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        self.database.ping().await?;
        Ok(())
    }
}

fn hold_to_active_model(entry: &ReconciliationEntry) -> hold_row::ActiveModel {
    hold_row::ActiveModel {
        drop_id: Set(entry.drop_id.clone()),
        kind: Set(entry.kind.as_str().to_string()),
        reason: Set(entry.reason.as_str().to_string()),
        payment_request: Set(entry.payment_request.clone()),
        payment_hash: Set(entry.payment_hash.clone()),
        detail: Set(entry.detail.clone()),
        recorded_at: Set(entry.recorded_at),
    }
}

fn hold_from_model(model: hold_row::Model) -> StoreResult<ReconciliationEntry> {
    let corrupt = |reason: String| StoreError::Corrupt {
        id: model.drop_id.clone(),
        reason,
    };
    let kind = model.kind.parse::<PayoutKind>().map_err(corrupt)?;
    let reason = model
        .reason
        .parse::<ReconciliationReason>()
        .map_err(corrupt)?;
    Ok(ReconciliationEntry {
        drop_id: model.drop_id,
        kind,
        reason,
        payment_request: model.payment_request,
        payment_hash: model.payment_hash,
        detail: model.detail,
        recorded_at: model.recorded_at,
    })
}

fn to_active_model(drop: &Drop) -> StoreResult<drop_row::ActiveModel> {
    let amount_msat = i64::try_from(drop.amount_msat).map_err(|_| StoreError::Corrupt {
        id: drop.id.to_string(),
        reason: format!("amount {} exceeds i64", drop.amount_msat),
    })?;
    Ok(drop_row::ActiveModel {
        id: Set(drop.id.to_string()),
        status: Set(drop.status.as_str().to_string()),
        amount_msat: Set(amount_msat),
        expiry: Set(drop.expiry),
        message: Set(drop.message.clone()),
        show_in_gallery: Set(drop.show_in_gallery),
        created_at: Set(drop.created_at),
        claimed_at: Set(drop.claimed_at),
        view_count: Set(i32::try_from(drop.view_count).unwrap_or(i32::MAX)),
        last_view_reset: Set(drop.last_view_reset),
    })
}

fn from_model(model: drop_row::Model) -> StoreResult<Drop> {
    let corrupt = |reason: String| StoreError::Corrupt {
        id: model.id.clone(),
        reason,
    };
    let id = DropId::parse(&model.id).map_err(|err| corrupt(err.to_string()))?;
    let status = model.status.parse::<DropStatus>().map_err(corrupt)?;
    let amount_msat = u64::try_from(model.amount_msat)
        .map_err(|_| corrupt(format!("negative amount {}", model.amount_msat)))?;
    let view_count = u32::try_from(model.view_count).unwrap_or(0);

    Ok(Drop {
        id,
        status,
        amount_msat,
        expiry: model.expiry,
        message: model.message,
        show_in_gallery: model.show_in_gallery,
        created_at: model.created_at,
        claimed_at: model.claimed_at,
        view_count,
        last_view_reset: model.last_view_reset,
    })
}
