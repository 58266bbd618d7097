use chrono::{Duration, NaiveDateTime};

use punchsync_common::error::PunchsyncResult;
use punchsync_db::watermark::repositories::WatermarkRepository;

/// One cursor per terminal, keyed by terminal id.
pub struct WatermarkStore<W> {
    repo: W,
}

impl<W> WatermarkStore<W>
where
    W: WatermarkRepository,
{
    pub fn new(repo: W) -> Self {
        Self { repo }
    }

    /// Current cursor for `terminal_id`. The first time a terminal is seen,
    /// one is created one day before `now`.
    pub async fn load_or_init(
        &self,
        terminal_id: &str,
        now: NaiveDateTime,
    ) -> PunchsyncResult<NaiveDateTime> {
        if let Some(watermark) = self.repo.get(terminal_id).await? {
            return Ok(watermark.synced_at);
        }

        let initial = now - Duration::days(1);
        tracing::info!(
            terminal = terminal_id,
            %initial,
            "no watermark stored yet, starting one day back"
        );
        Ok(self.repo.advance(terminal_id, initial).await?.synced_at)
    }

    /// Persist `to` unless the stored cursor is already later. Returns the
    /// cursor actually in effect.
    pub async fn advance(
        &self,
        terminal_id: &str,
        to: NaiveDateTime,
    ) -> PunchsyncResult<NaiveDateTime> {
        let stored = self.repo.advance(terminal_id, to).await?;
        if stored.synced_at > to {
            tracing::warn!(
                terminal = terminal_id,
                requested = %to,
                kept = %stored.synced_at,
                "watermark not moved backwards"
            );
        }
        Ok(stored.synced_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, MemoryWatermarkRepo};

    #[tokio::test]
    async fn first_load_starts_one_day_back_and_persists() {
        let repo = MemoryWatermarkRepo::default();
        let store = WatermarkStore::new(repo.clone());

        let since = store.load_or_init("1", at(10, 9, 0)).await.expect("load");
        assert_eq!(since, at(9, 9, 0));
        assert_eq!(repo.current("1"), Some(at(9, 9, 0)));
    }

    #[tokio::test]
    async fn later_load_returns_stored_value() {
        let repo = MemoryWatermarkRepo::starting_at(at(10, 0, 0));
        let store = WatermarkStore::new(repo);

        let since = store.load_or_init("1", at(12, 0, 0)).await.expect("load");
        assert_eq!(since, at(10, 0, 0));
    }

    #[tokio::test]
    async fn advance_keeps_later_cursor() {
        let repo = MemoryWatermarkRepo::starting_at(at(10, 12, 0));
        let store = WatermarkStore::new(repo.clone());

        let kept = store.advance("1", at(10, 8, 0)).await.expect("advance");
        assert_eq!(kept, at(10, 12, 0));

        let moved = store.advance("1", at(10, 13, 0)).await.expect("advance");
        assert_eq!(moved, at(10, 13, 0));
        assert_eq!(repo.current("1"), Some(at(10, 13, 0)));
    }

    #[tokio::test]
    async fn terminals_keep_separate_cursors() {
        let repo = MemoryWatermarkRepo::starting_at(at(10, 0, 0));
        let store = WatermarkStore::new(repo.clone());

        store.advance("b", at(12, 9, 0)).await.expect("advance");

        assert_eq!(store.load_or_init("a", at(12, 9, 0)).await.expect("load"), at(10, 0, 0));
        assert_eq!(store.load_or_init("b", at(12, 9, 0)).await.expect("load"), at(12, 9, 0));
        assert_eq!(repo.current("a"), Some(at(10, 0, 0)));
    }
}
