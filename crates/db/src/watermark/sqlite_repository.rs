use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use sqlx::{Row, SqlitePool};

use crate::watermark::models::Watermark;
use crate::watermark::repositories::WatermarkRepository;
use crate::{format_ts, parse_ts};
use punchsync_common::error::{PunchsyncError, PunchsyncResult};

#[derive(Clone)]
pub struct SqliteWatermarkRepository {
    pool: SqlitePool,
}

impl SqliteWatermarkRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::sqlite::SqliteRow) -> PunchsyncResult<Watermark> {
        let synced_at: String = row.get("synced_at");
        let updated_at: String = row.get("updated_at");
        Ok(Watermark {
            source: row.get("source"),
            synced_at: parse_ts(&synced_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }
}

#[async_trait]
impl WatermarkRepository for SqliteWatermarkRepository {
    async fn get(&self, source: &str) -> PunchsyncResult<Option<Watermark>> {
        let row = sqlx::query(
            "select source, synced_at, updated_at from sync_watermarks where source = ?1",
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PunchsyncError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn advance(&self, source: &str, to: NaiveDateTime) -> PunchsyncResult<Watermark> {
        let row = sqlx::query(
            "insert into sync_watermarks (source, synced_at, updated_at)
             values (?1, ?2, ?3)
             on conflict (source) do update set
               synced_at = max(sync_watermarks.synced_at, excluded.synced_at),
               updated_at = excluded.updated_at
             returning source, synced_at, updated_at",
        )
        .bind(source)
        .bind(format_ts(to))
        .bind(format_ts(Local::now().naive_local()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PunchsyncError::Database(e.to_string()))?;

        Self::map_row(row)
    }
}
