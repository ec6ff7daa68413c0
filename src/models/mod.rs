pub mod drop;
pub mod payloads;
