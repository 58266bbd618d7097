use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{Row, SqlitePool};

use crate::ledger::models::LedgerEntry;
use crate::ledger::repositories::LedgerRepository;
use crate::{format_ts, parse_ts};
use punchsync_common::error::{PunchsyncError, PunchsyncResult};
use punchsync_common::punch::{IdentityKey, LedgerOutcome};

#[derive(Clone)]
pub struct SqliteLedgerRepository {
    pool: SqlitePool,
}

impl SqliteLedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::sqlite::SqliteRow) -> PunchsyncResult<LedgerEntry> {
        let occurred_at: String = row.get("occurred_at");
        let last_attempt_at: String = row.get("last_attempt_at");
        let outcome: String = row.get("outcome");
        let attempts: i64 = row.get("attempts");

        Ok(LedgerEntry {
            key: IdentityKey::new(row.get::<String, _>("employee_id"), parse_ts(&occurred_at)?),
            outcome: outcome
                .parse::<LedgerOutcome>()
                .map_err(PunchsyncError::Database)?,
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            last_attempt_at: parse_ts(&last_attempt_at)?,
            reason: row.get("reason"),
        })
    }
}

#[async_trait]
impl LedgerRepository for SqliteLedgerRepository {
    async fn load_all(&self) -> PunchsyncResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            "select employee_id, occurred_at, outcome, attempts, last_attempt_at, reason
             from delivery_ledger
             order by occurred_at, employee_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PunchsyncError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn upsert(&self, entry: &LedgerEntry) -> PunchsyncResult<()> {
        sqlx::query(
            "insert into delivery_ledger
               (employee_id, occurred_at, outcome, attempts, last_attempt_at, reason)
             values (?1, ?2, ?3, ?4, ?5, ?6)
             on conflict (employee_id, occurred_at) do update set
               outcome = excluded.outcome,
               attempts = excluded.attempts,
               last_attempt_at = excluded.last_attempt_at,
               reason = excluded.reason",
        )
        .bind(&entry.key.employee_id)
        .bind(format_ts(entry.key.occurred_at))
        .bind(entry.outcome.as_str())
        .bind(i64::from(entry.attempts))
        .bind(format_ts(entry.last_attempt_at))
        .bind(entry.reason.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| PunchsyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn prune_before(&self, cutoff: NaiveDateTime) -> PunchsyncResult<u64> {
        let result = sqlx::query("delete from delivery_ledger where occurred_at < ?1")
            .bind(format_ts(cutoff))
            .execute(&self.pool)
            .await
            .map_err(|e| PunchsyncError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
