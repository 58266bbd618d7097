use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use punchsync_common::punch::{IdentityKey, LedgerOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub key: IdentityKey,
    pub outcome: LedgerOutcome,
    /// Delivery attempts that ended in this key's current outcome or earlier ones.
    pub attempts: u32,
    pub last_attempt_at: NaiveDateTime,
    pub reason: Option<String>,
}
