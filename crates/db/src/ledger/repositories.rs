use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::ledger::models::LedgerEntry;
use punchsync_common::error::PunchsyncResult;

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Every retained entry, for rebuilding the in-memory ledger at startup.
    async fn load_all(&self) -> PunchsyncResult<Vec<LedgerEntry>>;

    /// Insert or replace the entry for `entry.key`.
    async fn upsert(&self, entry: &LedgerEntry) -> PunchsyncResult<()>;

    /// Delete entries for punches strictly before `cutoff`. Returns the count removed.
    async fn prune_before(&self, cutoff: NaiveDateTime) -> PunchsyncResult<u64>;
}
