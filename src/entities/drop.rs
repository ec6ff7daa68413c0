//! Drop row, one per drop id.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "drops")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub status: String,
    /// Amount in millisatoshis
    pub amount_msat: i64,
    /// Epoch seconds after which the drop can no longer be claimed
    pub expiry: i64,
    #[sea_orm(column_type = "Text", nullable)]
    pub message: Option<String>,
    pub show_in_gallery: bool,
    pub created_at: i64,
    pub claimed_at: Option<i64>,
    pub view_count: i32,
    pub last_view_reset: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
