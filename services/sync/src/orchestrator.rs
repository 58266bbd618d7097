use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::{Duration, NaiveDateTime};
use futures::stream::{self, StreamExt};

use punchsync_common::error::PunchsyncError;
use punchsync_common::punch::{DeliveryOutcome, LogicalEvent};
use punchsync_config::{AppConfig, SyncSettings, TerminalConfig};
use punchsync_db::ledger::repositories::LedgerRepository;
use punchsync_db::watermark::repositories::WatermarkRepository;

use crate::classify::{EmployeeIdFormat, PunchClassifier};
use crate::context::SyncContext;
use crate::downstream::client::DownstreamClient;
use crate::gateway::DeliveryGateway;
use crate::ledger::{Admission, DeliveryLedger};
use crate::terminal::driver::TerminalDriver;
use crate::terminal::fetcher::{TerminalFetch, TerminalFetcher};
use crate::watermark::WatermarkStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Fetching,
    Classifying,
    Delivering,
    Committing,
    Backoff,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Classifying => "classifying",
            Self::Delivering => "delivering",
            Self::Committing => "committing",
            Self::Backoff => "backoff",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("state store: {0}")]
    StateIo(#[from] PunchsyncError),
}

/// Counts for one batch. Logged at the end of every successful batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub fetched: usize,
    pub unreachable_terminals: usize,
    /// Punches whose user id could not be mapped to an employee.
    pub invalid: usize,
    pub duplicates: usize,
    pub already_delivered: usize,
    pub exhausted: usize,
    pub delivered: usize,
    pub already_existed: usize,
    pub not_active: usize,
    pub transient: usize,
    /// Transient failures past the retry cap. They no longer hold a watermark.
    pub abandoned: usize,
    pub rejected: usize,
    /// Not attempted because shutdown was requested or the ledger failed.
    pub skipped: usize,
    /// Cursor in effect per terminal after the commit.
    pub watermarks: BTreeMap<String, NaiveDateTime>,
}

impl BatchSummary {
    pub fn failed(&self) -> usize {
        self.transient + self.rejected
    }

    fn log(&self) {
        tracing::info!(
            fetched = self.fetched,
            delivered = self.delivered,
            already_existed = self.already_existed,
            failed = self.failed(),
            not_active = self.not_active,
            abandoned = self.abandoned,
            duplicates = self.duplicates,
            already_delivered = self.already_delivered,
            exhausted = self.exhausted,
            invalid = self.invalid,
            skipped = self.skipped,
            unreachable_terminals = self.unreachable_terminals,
            watermarks = ?self.watermarks,
            "sync batch complete"
        );
    }
}

/// Drives fetch, classify, deliver and commit, one batch at a time.
pub struct Orchestrator<D, C, W, L> {
    terminals: Vec<TerminalConfig>,
    settings: SyncSettings,
    fetcher: TerminalFetcher<D>,
    classifier: PunchClassifier,
    gateway: DeliveryGateway<C>,
    watermark: WatermarkStore<W>,
    ledger: DeliveryLedger<L>,
    ledger_loaded: bool,
    ctx: SyncContext,
    state: SyncState,
    consecutive_failures: u32,
    /// Consecutive batches in which a terminal could not be read.
    unreachable_streaks: HashMap<String, u32>,
}

impl<D, C, W, L> Orchestrator<D, C, W, L>
where
    D: TerminalDriver,
    C: DownstreamClient,
    W: WatermarkRepository,
    L: LedgerRepository,
{
    pub fn new(
        config: &AppConfig,
        driver: D,
        client: C,
        watermark_repo: W,
        ledger_repo: L,
        ctx: SyncContext,
    ) -> Self {
        let classifier = PunchClassifier::new(
            config.in_window,
            config.punch_codes.clone(),
            EmployeeIdFormat::new(&config.employee_id),
        );
        let fetcher = TerminalFetcher::new(driver, &config.sync, ctx.shutdown.clone());
        Self {
            terminals: config.terminals.clone(),
            settings: config.sync.clone(),
            fetcher,
            classifier,
            gateway: DeliveryGateway::new(client),
            watermark: WatermarkStore::new(watermark_repo),
            ledger: DeliveryLedger::new(
                ledger_repo,
                config.sync.max_delivery_attempts,
                config.sync.ledger_grace_hours,
            ),
            ledger_loaded: false,
            ctx,
            state: SyncState::Idle,
            consecutive_failures: 0,
            unreachable_streaks: HashMap::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn enter(&mut self, state: SyncState) {
        tracing::debug!(from = %self.state, to = %state, "sync state");
        self.state = state;
    }

    /// Loop until shutdown: `sync_interval` between good batches, `backoff`
    /// after a failed one.
    pub async fn run(&mut self) {
        tracing::info!(
            terminals = self.terminals.len(),
            interval_secs = self.settings.sync_interval_secs,
            "sync loop started"
        );

        let shutdown = self.ctx.shutdown.clone();
        while !shutdown.is_cancelled() {
            let delay = match self.run_once().await {
                Ok(_) => self.settings.sync_interval(),
                Err(_) => self.settings.backoff(),
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(
            state = %self.state(),
            consecutive_failures = self.consecutive_failures(),
            "sync loop stopped"
        );
    }

    /// One batch plus failure accounting and escalation.
    pub async fn run_once(&mut self) -> Result<BatchSummary, BatchError> {
        let result = self.run_batch().await;

        match &result {
            Ok(summary) => {
                summary.log();
                if self.consecutive_failures > 0 {
                    tracing::info!(
                        previous_failures = self.consecutive_failures,
                        "sync recovered"
                    );
                }
                self.consecutive_failures = 0;
                self.enter(SyncState::Idle);
            }
            Err(e) => {
                self.consecutive_failures += 1;
                tracing::error!(
                    error = %e,
                    consecutive_failures = self.consecutive_failures,
                    backoff_secs = self.settings.backoff_secs,
                    "sync batch failed"
                );
                self.enter(SyncState::Backoff);
                if self.consecutive_failures == self.settings.max_consecutive_failures {
                    self.escalate(e).await;
                }
            }
        }

        result
    }

    async fn escalate(&self, error: &BatchError) {
        let subject = format!(
            "punchsync: {} consecutive sync failures",
            self.consecutive_failures
        );
        let summary = format!(
            "Attendance sync has failed {} times in a row.\nLast error: {}",
            self.consecutive_failures, error,
        );
        self.alert(&subject, &summary).await;
    }

    async fn escalate_unreachable(&self, terminal_id: &str, batches: u32) {
        let address = self
            .terminals
            .iter()
            .find(|t| t.id == terminal_id)
            .map_or("-", |t| t.address.as_str());
        let subject = format!("punchsync: terminal {terminal_id} unreachable");
        let summary = format!(
            "Terminal {terminal_id} ({address}) could not be read in {batches} consecutive batches.\n\
             Its watermark stays where it is until the terminal answers again."
        );
        self.alert(&subject, &summary).await;
    }

    async fn alert(&self, subject: &str, summary: &str) {
        let body = format!(
            "{summary}\n\nRecent errors:\n{}",
            self.ctx.error_tail.render_last(self.settings.error_tail_lines),
        );

        match self.ctx.notifier.notify(subject, &body).await {
            Ok(()) => tracing::info!(%subject, "escalation sent"),
            Err(e) => tracing::error!(error = %e, "failed to send escalation"),
        }
    }

    /// Count consecutive misses per terminal and escalate once a terminal
    /// reaches the threshold. Misses during shutdown are not counted.
    async fn track_reachability(&mut self, fetches: &[TerminalFetch]) {
        if self.ctx.shutdown.is_cancelled() {
            return;
        }
        for fetch in fetches {
            if fetch.complete {
                self.unreachable_streaks.remove(&fetch.terminal_id);
                continue;
            }
            let streak = self
                .unreachable_streaks
                .entry(fetch.terminal_id.clone())
                .or_insert(0);
            *streak += 1;
            let streak = *streak;
            if streak == self.settings.max_consecutive_failures {
                self.escalate_unreachable(&fetch.terminal_id, streak).await;
            }
        }
    }

    async fn run_batch(&mut self) -> Result<BatchSummary, BatchError> {
        let mut summary = BatchSummary::default();

        if !self.ledger_loaded {
            self.ledger.load().await?;
            self.ledger_loaded = true;
        }

        let started = self.ctx.clock.now();
        let mut cursors = Vec::with_capacity(self.terminals.len());
        for terminal in &self.terminals {
            let since = self.watermark.load_or_init(&terminal.id, started).await?;
            cursors.push((terminal.clone(), since));
        }

        self.enter(SyncState::Fetching);
        let fetches = self.fetcher.fetch_all(&cursors).await;
        let reachable: HashSet<String> = fetches
            .iter()
            .filter(|f| f.complete)
            .map(|f| f.terminal_id.clone())
            .collect();
        summary.unreachable_terminals = fetches.len() - reachable.len();
        self.track_reachability(&fetches).await;

        self.enter(SyncState::Classifying);
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for raw in fetches.into_iter().flat_map(|f| f.events) {
            summary.fetched += 1;

            let Some(event) = self.classifier.to_logical(&raw) else {
                summary.invalid += 1;
                tracing::warn!(
                    terminal = %raw.terminal_id,
                    user_id = %raw.user_id,
                    "punch with non-numeric user id ignored"
                );
                continue;
            };

            let key = event.key();
            if !seen.insert(key.clone()) {
                summary.duplicates += 1;
                continue;
            }

            match self.ledger.admission(&key).await {
                Admission::Attempt => pending.push(event),
                Admission::AlreadyDelivered => summary.already_delivered += 1,
                Admission::Exhausted => summary.exhausted += 1,
            }
        }

        self.enter(SyncState::Delivering);
        let results = self.deliver_all(pending).await;

        let mut retry_from: HashMap<String, NaiveDateTime> = HashMap::new();
        let mut first_error = None;
        for (event, outcome) in results {
            let outcome = match outcome {
                Delivery::Skipped => {
                    summary.skipped += 1;
                    hold_back(&mut retry_from, &event);
                    continue;
                }
                Delivery::Done(outcome) => outcome,
                Delivery::NotRecorded(outcome, e) => {
                    first_error.get_or_insert(e);
                    outcome
                }
            };
            match outcome {
                DeliveryOutcome::Delivered => summary.delivered += 1,
                DeliveryOutcome::AlreadyExists => summary.already_existed += 1,
                DeliveryOutcome::EmployeeNotActive => summary.not_active += 1,
                DeliveryOutcome::TransientFailure(reason) => {
                    summary.transient += 1;
                    let key = event.key();
                    if self.ledger.transient_exhausted(&key).await {
                        summary.abandoned += 1;
                        tracing::error!(
                            %key,
                            terminal = %event.terminal_id,
                            attempts = self.ledger.transient_attempts(&key).await,
                            %reason,
                            "punch keeps failing and no longer holds the watermark, needs operator attention"
                        );
                    } else {
                        hold_back(&mut retry_from, &event);
                    }
                }
                DeliveryOutcome::RejectedByDownstream(_) => summary.rejected += 1,
            }
        }
        if let Some(e) = first_error {
            return Err(e.into());
        }

        self.enter(SyncState::Committing);
        let now = self.ctx.clock.now();

        // Retention follows the terminals that were read. A terminal that is
        // down does not stall pruning; if it comes back with old punches the
        // existence check downstream catches them.
        let floor = cursors
            .iter()
            .filter(|(t, _)| reachable.contains(&t.id))
            .map(|(_, since)| *since)
            .min()
            .or_else(|| cursors.iter().map(|(_, since)| *since).min());
        if let Some(floor) = floor {
            self.ledger.persist(floor, now).await?;
            tracing::debug!(entries = self.ledger.len().await, "delivery ledger persisted");
        }

        for (terminal, since) in &cursors {
            let committed = if !reachable.contains(&terminal.id) {
                tracing::warn!(
                    terminal = %terminal.id,
                    watermark = %since,
                    "watermark held: terminal was not read"
                );
                *since
            } else {
                let target = match retry_from.get(&terminal.id) {
                    Some(earliest) => {
                        let held = std::cmp::min(*earliest - Duration::seconds(1), now);
                        tracing::info!(
                            terminal = %terminal.id,
                            watermark = %held,
                            "watermark held for punches awaiting retry"
                        );
                        held
                    }
                    None => now,
                };
                if target > *since {
                    self.watermark.advance(&terminal.id, target).await?
                } else {
                    *since
                }
            };
            summary.watermarks.insert(terminal.id.clone(), committed);
        }

        Ok(summary)
    }

    /// Deliver with bounded concurrency, recording each outcome as it lands.
    /// Once shutdown is requested or an outcome cannot be recorded, events
    /// not yet started are skipped.
    async fn deliver_all(&self, pending: Vec<LogicalEvent>) -> Vec<(LogicalEvent, Delivery)> {
        let concurrency = self.settings.delivery_concurrency.max(1);
        let halt = self.ctx.shutdown.child_token();
        let halt = &halt;

        stream::iter(pending)
            .map(|event| async move {
                if halt.is_cancelled() {
                    return (event, Delivery::Skipped);
                }
                let outcome = self.gateway.deliver(&event).await;
                let recorded = self
                    .ledger
                    .record(event.key(), &outcome, self.ctx.clock.now())
                    .await;
                let delivery = match recorded {
                    Ok(_) => Delivery::Done(outcome),
                    Err(e) => {
                        halt.cancel();
                        tracing::error!(
                            employee_id = %event.employee_id,
                            occurred_at = %event.occurred_at,
                            error = %e,
                            "failed to record delivery outcome, no further events this batch"
                        );
                        Delivery::NotRecorded(outcome, e)
                    }
                };
                (event, delivery)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await
    }
}

enum Delivery {
    Done(DeliveryOutcome),
    NotRecorded(DeliveryOutcome, PunchsyncError),
    Skipped,
}

/// Keep the earliest punch per terminal that must be fetched again.
fn hold_back(earliest: &mut HashMap<String, NaiveDateTime>, event: &LogicalEvent) {
    earliest
        .entry(event.terminal_id.clone())
        .and_modify(|at| *at = (*at).min(event.occurred_at))
        .or_insert(event.occurred_at);
}
