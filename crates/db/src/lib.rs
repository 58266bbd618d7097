pub mod ledger;
pub mod watermark;

use std::str::FromStr;

use chrono::NaiveDateTime;
use punchsync_common::error::{PunchsyncError, PunchsyncResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

/// ISO-8601 layout for every timestamp column. Fixed width, so text
/// comparison orders the same way as time.
const STORED_TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%S";

/// Open the state database, creating the file and schema if missing.
///
/// The pool holds a single connection: the daemon is the only writer, and an
/// in-memory database lives exactly as long as its one connection.
pub async fn create_pool(database_url: &str) -> PunchsyncResult<SqlitePool> {
    tracing::info!(database_url, "opening state store");

    let mut options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| PunchsyncError::Database(e.to_string()))?
        .create_if_missing(true)
        .synchronous(SqliteSynchronous::Full);
    if !database_url.contains(":memory:") {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| PunchsyncError::Database(e.to_string()))?;

    migrate(&pool).await?;
    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> PunchsyncResult<()> {
    sqlx::query(
        "create table if not exists sync_watermarks (
           source text primary key,
           synced_at text not null,
           updated_at text not null
         )",
    )
    .execute(pool)
    .await
    .map_err(|e| PunchsyncError::Database(e.to_string()))?;

    sqlx::query(
        "create table if not exists delivery_ledger (
           employee_id text not null,
           occurred_at text not null,
           outcome text not null,
           attempts integer not null default 1,
           last_attempt_at text not null,
           reason text,
           primary key (employee_id, occurred_at)
         )",
    )
    .execute(pool)
    .await
    .map_err(|e| PunchsyncError::Database(e.to_string()))?;

    Ok(())
}

pub(crate) fn format_ts(ts: NaiveDateTime) -> String {
    ts.format(STORED_TIMESTAMP).to_string()
}

pub(crate) fn parse_ts(raw: &str) -> PunchsyncResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, STORED_TIMESTAMP)
        .map_err(|e| PunchsyncError::Database(format!("bad stored timestamp `{raw}`: {e}")))
}
