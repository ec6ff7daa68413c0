//! Payout awaiting manual reconciliation, at most one per drop.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "reconciliation_holds")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub drop_id: String,
    pub kind: String,
    pub reason: String,
    #[sea_orm(column_type = "Text")]
    pub payment_request: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub payment_hash: Option<String>,
    #[sea_orm(column_type = "Text")]
    pub detail: String,
    pub recorded_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
