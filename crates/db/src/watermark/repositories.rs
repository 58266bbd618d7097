use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::watermark::models::Watermark;
use punchsync_common::error::PunchsyncResult;

#[async_trait]
pub trait WatermarkRepository: Send + Sync {
    /// Current cursor for `source`, or `None` before the first commit.
    async fn get(&self, source: &str) -> PunchsyncResult<Option<Watermark>>;

    /// Move the cursor for `source` to `to`, creating it if missing.
    /// An older `to` than the stored value leaves the cursor where it is;
    /// the returned row is what is actually stored.
    async fn advance(&self, source: &str, to: NaiveDateTime) -> PunchsyncResult<Watermark>;
}
