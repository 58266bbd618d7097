use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};
use tokio::sync::Mutex;

use punchsync_common::error::PunchsyncResult;
use punchsync_common::punch::{DeliveryOutcome, IdentityKey, LedgerOutcome};
use punchsync_db::ledger::models::LedgerEntry;
use punchsync_db::ledger::repositories::LedgerRepository;

/// What the ledger says about attempting a key again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Attempt,
    AlreadyDelivered,
    /// Failed `max_attempts` times; left for the operator.
    Exhausted,
}

/// Local record of what has been delivered, backed by durable storage.
///
/// Every `record` writes through to the repository while holding the lock,
/// so concurrent delivery workers never interleave writes and a crash loses
/// at most the in-flight event. Transient failures are only counted in
/// memory and never reach the repository.
pub struct DeliveryLedger<L> {
    repo: L,
    entries: Mutex<HashMap<IdentityKey, LedgerEntry>>,
    transient: Mutex<HashMap<IdentityKey, u32>>,
    max_attempts: u32,
    retention_grace: Duration,
}

impl<L> DeliveryLedger<L>
where
    L: LedgerRepository,
{
    pub fn new(repo: L, max_attempts: u32, retention_grace_hours: u32) -> Self {
        Self {
            repo,
            entries: Mutex::new(HashMap::new()),
            transient: Mutex::new(HashMap::new()),
            max_attempts,
            retention_grace: Duration::hours(i64::from(retention_grace_hours)),
        }
    }

    /// Rebuild the in-memory view from storage. Returns the number of entries.
    pub async fn load(&self) -> PunchsyncResult<usize> {
        let stored = self.repo.load_all().await?;
        let mut entries = self.entries.lock().await;
        entries.clear();
        entries.extend(stored.into_iter().map(|e| (e.key.clone(), e)));
        tracing::info!(entries = entries.len(), "delivery ledger loaded");
        Ok(entries.len())
    }

    pub async fn has_delivered(&self, key: &IdentityKey) -> bool {
        matches!(
            self.entries.lock().await.get(key),
            Some(LedgerEntry {
                outcome: LedgerOutcome::Delivered,
                ..
            })
        )
    }

    pub async fn admission(&self, key: &IdentityKey) -> Admission {
        if self.has_delivered(key).await {
            return Admission::AlreadyDelivered;
        }
        match self.entries.lock().await.get(key) {
            Some(entry) if entry.attempts >= self.max_attempts => Admission::Exhausted,
            _ => Admission::Attempt,
        }
    }

    /// Transient failures seen for `key` since the process started.
    pub async fn transient_attempts(&self, key: &IdentityKey) -> u32 {
        self.transient.lock().await.get(key).copied().unwrap_or(0)
    }

    /// Whether `key` has failed transiently `max_attempts` times.
    pub async fn transient_exhausted(&self, key: &IdentityKey) -> bool {
        self.transient_attempts(key).await >= self.max_attempts
    }

    /// Record the outcome of one delivery attempt.
    ///
    /// Transient failures leave the stored ledger untouched so the key is
    /// retried; they only bump the in-memory counter. Returns the entry
    /// written, if any.
    pub async fn record(
        &self,
        key: IdentityKey,
        outcome: &DeliveryOutcome,
        now: NaiveDateTime,
    ) -> PunchsyncResult<Option<LedgerEntry>> {
        if let DeliveryOutcome::TransientFailure(_) = outcome {
            *self.transient.lock().await.entry(key).or_insert(0) += 1;
            return Ok(None);
        }
        self.transient.lock().await.remove(&key);

        let mut entries = self.entries.lock().await;
        let attempts = entries.get(&key).map_or(0, |e| e.attempts) + 1;

        let (ledger_outcome, reason) = match outcome {
            DeliveryOutcome::TransientFailure(_) => return Ok(None),
            DeliveryOutcome::Delivered | DeliveryOutcome::AlreadyExists => {
                (LedgerOutcome::Delivered, None)
            }
            DeliveryOutcome::EmployeeNotActive if attempts >= self.max_attempts => (
                LedgerOutcome::PermanentlyFailed,
                Some(format!("employee not active after {attempts} attempts")),
            ),
            DeliveryOutcome::EmployeeNotActive => (LedgerOutcome::NotActive, None),
            DeliveryOutcome::RejectedByDownstream(reason) => {
                (LedgerOutcome::PermanentlyFailed, Some(reason.clone()))
            }
        };

        let entry = LedgerEntry {
            key,
            outcome: ledger_outcome,
            attempts,
            last_attempt_at: now,
            reason,
        };
        self.repo.upsert(&entry).await?;

        if entry.outcome != LedgerOutcome::Delivered && attempts >= self.max_attempts {
            tracing::warn!(
                key = %entry.key,
                attempts,
                reason = entry.reason.as_deref().unwrap_or("-"),
                "giving up on punch, needs operator attention"
            );
        }

        entries.insert(entry.key.clone(), entry.clone());
        Ok(Some(entry))
    }

    /// Prune entries past retention: older than the start of `now`'s day
    /// minus the grace period, and never at or after `watermark`, since
    /// those punches can still be fetched again.
    pub async fn persist(
        &self,
        watermark: NaiveDateTime,
        now: NaiveDateTime,
    ) -> PunchsyncResult<u64> {
        let start_of_day = now.date().and_time(chrono::NaiveTime::MIN);
        let cutoff = std::cmp::min(start_of_day - self.retention_grace, watermark);

        let mut entries = self.entries.lock().await;
        let removed = self.repo.prune_before(cutoff).await?;
        entries.retain(|key, _| key.occurred_at >= cutoff);
        self.transient
            .lock()
            .await
            .retain(|key, _| key.occurred_at >= cutoff);

        if removed > 0 {
            tracing::info!(removed, %cutoff, "pruned delivery ledger");
        }
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
