//! In-memory collaborators shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use punchsync_common::error::{PunchsyncError, PunchsyncResult};
use punchsync_common::punch::{Direction, IdentityKey, LogicalEvent, RawPunchEvent};
use punchsync_config::{
    AppConfig, DownstreamConfig, EmployeeIdConfig, InWindow, NotifierConfig, PunchCodes,
    SyncSettings, TerminalConfig,
};
use punchsync_db::ledger::models::LedgerEntry;
use punchsync_db::ledger::repositories::LedgerRepository;
use punchsync_db::watermark::models::Watermark;
use punchsync_db::watermark::repositories::WatermarkRepository;

use crate::context::Clock;
use crate::downstream::client::{DownstreamClient, DownstreamError};
use crate::downstream::models::{CreateOutcome, EmployeeStatus};
use crate::notify::{Notifier, NotifyError};
use crate::terminal::driver::{TerminalDriver, TerminalError};

/// `2024-01-{day} {hour}:{minute}:00`
pub fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

pub fn raw(terminal_id: &str, user_id: &str, occurred_at: NaiveDateTime) -> RawPunchEvent {
    RawPunchEvent {
        terminal_id: terminal_id.to_string(),
        user_id: user_id.to_string(),
        occurred_at,
        raw_code: None,
    }
}

pub fn logical(employee_id: &str, occurred_at: NaiveDateTime) -> LogicalEvent {
    LogicalEvent {
        employee_id: employee_id.to_string(),
        occurred_at,
        direction: Direction::In,
        terminal_id: "1".to_string(),
    }
}

pub fn test_settings() -> SyncSettings {
    SyncSettings {
        fetch_retry_delay_secs: 0,
        fetch_timeout_secs: 5,
        backoff_secs: 0,
        sync_interval_secs: 0,
        ..SyncSettings::default()
    }
}

pub fn test_config(terminal_ids: &[&str]) -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        terminals: terminal_ids
            .iter()
            .map(|id| TerminalConfig {
                id: id.to_string(),
                address: format!("{id}.local:4370"),
            })
            .collect(),
        in_window: InWindow::default(),
        punch_codes: PunchCodes::default(),
        employee_id: EmployeeIdConfig::default(),
        sync: test_settings(),
        downstream: DownstreamConfig {
            base_url: "http://localhost".to_string(),
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            timeout_secs: 5,
            max_retries: 0,
        },
        notifier: NotifierConfig::default(),
        log_level: "debug".to_string(),
    }
}

fn simulated(what: &str) -> PunchsyncError {
    PunchsyncError::Database(format!("simulated {what} failure"))
}

// --- clock & notifier ---

pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

// --- repositories ---

/// Cursors keyed by source. With `starting_at`, a source never written
/// reads as if it had been stored at that instant.
#[derive(Clone, Default)]
pub struct MemoryWatermarkRepo {
    cursors: Arc<Mutex<HashMap<String, Watermark>>>,
    seed: Option<NaiveDateTime>,
    failing: Arc<AtomicBool>,
}

impl MemoryWatermarkRepo {
    pub fn starting_at(synced_at: NaiveDateTime) -> Self {
        Self {
            seed: Some(synced_at),
            ..Self::default()
        }
    }

    pub fn current(&self, source: &str) -> Option<NaiveDateTime> {
        self.lookup(source).map(|w| w.synced_at)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn lookup(&self, source: &str) -> Option<Watermark> {
        let cursors = self.cursors.lock().unwrap();
        cursors.get(source).cloned().or_else(|| {
            self.seed.map(|synced_at| Watermark {
                source: source.to_string(),
                synced_at,
                updated_at: synced_at,
            })
        })
    }
}

#[async_trait]
impl WatermarkRepository for MemoryWatermarkRepo {
    async fn get(&self, source: &str) -> PunchsyncResult<Option<Watermark>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(simulated("watermark read"));
        }
        Ok(self.lookup(source))
    }

    async fn advance(&self, source: &str, to: NaiveDateTime) -> PunchsyncResult<Watermark> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(simulated("watermark write"));
        }
        let synced_at = match self.lookup(source) {
            Some(existing) if existing.synced_at > to => existing.synced_at,
            _ => to,
        };
        let watermark = Watermark {
            source: source.to_string(),
            synced_at,
            updated_at: to,
        };
        self.cursors
            .lock()
            .unwrap()
            .insert(source.to_string(), watermark.clone());
        Ok(watermark)
    }
}

#[derive(Clone, Default)]
pub struct MemoryLedgerRepo {
    entries: Arc<Mutex<HashMap<IdentityKey, LedgerEntry>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryLedgerRepo {
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<_> = self.entries.lock().unwrap().values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Simulates losing the state file.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerRepository for MemoryLedgerRepo {
    async fn load_all(&self) -> PunchsyncResult<Vec<LedgerEntry>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(simulated("ledger read"));
        }
        Ok(self.entries())
    }

    async fn upsert(&self, entry: &LedgerEntry) -> PunchsyncResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(simulated("ledger write"));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn prune_before(&self, cutoff: NaiveDateTime) -> PunchsyncResult<u64> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(simulated("ledger prune"));
        }
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|key, _| key.occurred_at >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}

// --- terminal driver ---

#[derive(Debug, Clone)]
pub enum TerminalBehavior {
    /// Every fetch returns the full log.
    Events(Vec<RawPunchEvent>),
    FailConnect,
    FailFetch,
    /// The first `n` connects fail, later ones return the log.
    FailFirst(u32, Vec<RawPunchEvent>),
}

#[derive(Clone, Default)]
pub struct MockDriver {
    behaviors: Arc<Mutex<HashMap<String, TerminalBehavior>>>,
    connects: Arc<Mutex<HashMap<String, u32>>>,
    disconnects: Arc<Mutex<HashMap<String, u32>>>,
}

pub struct MockSession {
    terminal_id: String,
}

impl MockDriver {
    pub fn with(self, terminal_id: &str, behavior: TerminalBehavior) -> Self {
        self.set(terminal_id, behavior);
        self
    }

    pub fn set(&self, terminal_id: &str, behavior: TerminalBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(terminal_id.to_string(), behavior);
    }

    pub fn connects(&self, terminal_id: &str) -> u32 {
        self.connects
            .lock()
            .unwrap()
            .get(terminal_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn disconnects(&self, terminal_id: &str) -> u32 {
        self.disconnects
            .lock()
            .unwrap()
            .get(terminal_id)
            .copied()
            .unwrap_or(0)
    }

    fn behavior(&self, terminal_id: &str) -> TerminalBehavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(terminal_id)
            .cloned()
            .unwrap_or(TerminalBehavior::Events(Vec::new()))
    }
}

#[async_trait]
impl TerminalDriver for MockDriver {
    type Session = MockSession;

    async fn connect(
        &self,
        terminal: &TerminalConfig,
        _timeout: Duration,
    ) -> Result<MockSession, TerminalError> {
        let count = {
            let mut connects = self.connects.lock().unwrap();
            let count = connects.entry(terminal.id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let refused = TerminalError::Connect {
            address: terminal.address.clone(),
            reason: "connection refused".to_string(),
        };
        match self.behavior(&terminal.id) {
            TerminalBehavior::FailConnect => Err(refused),
            TerminalBehavior::FailFirst(n, _) if count <= n => Err(refused),
            _ => Ok(MockSession {
                terminal_id: terminal.id.clone(),
            }),
        }
    }

    async fn fetch_events(
        &self,
        session: &mut MockSession,
    ) -> Result<Vec<RawPunchEvent>, TerminalError> {
        match self.behavior(&session.terminal_id) {
            TerminalBehavior::Events(events) | TerminalBehavior::FailFirst(_, events) => Ok(events),
            TerminalBehavior::FailFetch | TerminalBehavior::FailConnect => {
                Err(TerminalError::Fetch("read interrupted".to_string()))
            }
        }
    }

    async fn disconnect(&self, session: MockSession) {
        *self
            .disconnects
            .lock()
            .unwrap()
            .entry(session.terminal_id)
            .or_insert(0) += 1;
    }
}

// --- downstream ---

#[derive(Default)]
struct DownstreamState {
    statuses: HashMap<String, EmployeeStatus>,
    existing: HashSet<IdentityKey>,
    created: Vec<LogicalEvent>,
    create_calls: u32,
    status_failing: bool,
    failing_statuses: HashSet<String>,
    find_failing: bool,
    create_failing: bool,
    create_response: Option<CreateOutcome>,
    create_latency: Option<Duration>,
    creates_in_flight: usize,
    max_creates_in_flight: usize,
}

/// Downstream with a record store: created checkins become visible to
/// `find_checkin`. Unknown employees are `NotFound`.
#[derive(Clone, Default)]
pub struct MockDownstream {
    state: Arc<Mutex<DownstreamState>>,
}

impl MockDownstream {
    pub fn with_active(self, employee_id: &str) -> Self {
        self.with_status(employee_id, EmployeeStatus::Active)
    }

    pub fn with_status(self, employee_id: &str, status: EmployeeStatus) -> Self {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(employee_id.to_string(), status);
        self
    }

    /// Status lookups for this employee always fail.
    pub fn with_failing_status(self, employee_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_statuses
            .insert(employee_id.to_string());
        self
    }

    /// Every create waits this long before answering.
    pub fn with_create_latency(self, latency: Duration) -> Self {
        self.state.lock().unwrap().create_latency = Some(latency);
        self
    }

    pub fn with_existing(self, employee_id: &str, occurred_at: NaiveDateTime) -> Self {
        self.state
            .lock()
            .unwrap()
            .existing
            .insert(IdentityKey::new(employee_id, occurred_at));
        self
    }

    pub fn created(&self) -> Vec<LogicalEvent> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn create_calls(&self) -> u32 {
        self.state.lock().unwrap().create_calls
    }

    /// Highest number of creates observed running at the same time.
    pub fn max_creates_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_creates_in_flight
    }

    pub fn set_status_failing(&self, failing: bool) {
        self.state.lock().unwrap().status_failing = failing;
    }

    pub fn set_find_failing(&self, failing: bool) {
        self.state.lock().unwrap().find_failing = failing;
    }

    pub fn set_create_failing(&self, failing: bool) {
        self.state.lock().unwrap().create_failing = failing;
    }

    pub fn set_create_response(&self, response: Option<CreateOutcome>) {
        self.state.lock().unwrap().create_response = response;
    }
}

fn outage() -> DownstreamError {
    DownstreamError::MaxRetriesExceeded {
        attempts: 1,
        last_error: "simulated outage".to_string(),
    }
}

#[async_trait]
impl DownstreamClient for MockDownstream {
    async fn get_employee_status(
        &self,
        employee_id: &str,
    ) -> Result<EmployeeStatus, DownstreamError> {
        let state = self.state.lock().unwrap();
        if state.status_failing || state.failing_statuses.contains(employee_id) {
            return Err(outage());
        }
        Ok(state
            .statuses
            .get(employee_id)
            .copied()
            .unwrap_or(EmployeeStatus::NotFound))
    }

    async fn find_checkin(
        &self,
        employee_id: &str,
        occurred_at: NaiveDateTime,
    ) -> Result<bool, DownstreamError> {
        let state = self.state.lock().unwrap();
        if state.find_failing {
            return Err(outage());
        }
        Ok(state
            .existing
            .contains(&IdentityKey::new(employee_id, occurred_at)))
    }

    async fn create_checkin(
        &self,
        event: &LogicalEvent,
    ) -> Result<CreateOutcome, DownstreamError> {
        let latency = {
            let mut state = self.state.lock().unwrap();
            state.creates_in_flight += 1;
            state.max_creates_in_flight = state.max_creates_in_flight.max(state.creates_in_flight);
            state.create_latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().unwrap();
        state.creates_in_flight -= 1;
        state.create_calls += 1;
        if state.create_failing {
            return Err(outage());
        }
        if let Some(response) = state.create_response.clone() {
            return Ok(response);
        }
        state.existing.insert(event.key());
        state.created.push(event.clone());
        Ok(CreateOutcome::Created {
            name: format!("EMP-CKIN-{:04}", state.created.len()),
        })
    }
}
