pub mod drop;
pub mod reconciliation_hold;
