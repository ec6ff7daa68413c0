//! Funding memo correlation.
//!
//! The gateway echoes the receivable memo back in its completion
//! notification, which is the only link from a payment to its drop. Both
//! directions of that format live here and nowhere else.

use crate::drop_id::{DropId, is_well_formed};

const MEMO_PREFIX: &str = "ZapDrop:";
const ID_SEPARATOR: &str = "- ";

pub fn funding_memo(amount_sats: u64, id: &DropId) -> String {
    format!("{MEMO_PREFIX} {amount_sats} sats {ID_SEPARATOR}{id}")
}

/// Recover the drop id from a memo, or `None` for memos we did not issue.
pub fn drop_id_from_memo(memo: &str) -> Option<DropId> {
    let body = memo.trim().strip_prefix(MEMO_PREFIX)?;
    let (_, candidate) = body.rsplit_once(ID_SEPARATOR)?;
    if !is_well_formed(candidate) {
        return None;
    }
    DropId::parse(candidate).ok()
}
