use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::NaiveDateTime;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use punchsync_common::punch::RawPunchEvent;
use punchsync_config::{SyncSettings, TerminalConfig};

use super::driver::{TerminalDriver, TerminalError};

/// What one terminal contributed to a batch.
#[derive(Debug, Clone)]
pub struct TerminalFetch {
    pub terminal_id: String,
    /// Punches strictly after `since`, oldest first.
    pub events: Vec<RawPunchEvent>,
    /// `false` when every attempt failed.
    pub complete: bool,
}

pub struct TerminalFetcher<D> {
    driver: D,
    retries: u32,
    retry_delay: Duration,
    timeout: Duration,
    reachable: Mutex<HashMap<String, bool>>,
    shutdown: CancellationToken,
}

impl<D> TerminalFetcher<D>
where
    D: TerminalDriver,
{
    pub fn new(driver: D, settings: &SyncSettings, shutdown: CancellationToken) -> Self {
        Self {
            driver,
            retries: settings.fetch_retries.max(1),
            retry_delay: settings.fetch_retry_delay(),
            timeout: settings.fetch_timeout(),
            reachable: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Fetch every terminal concurrently, each from its own cursor. Results
    /// keep input order.
    pub async fn fetch_all(
        &self,
        cursors: &[(TerminalConfig, NaiveDateTime)],
    ) -> Vec<TerminalFetch> {
        join_all(cursors.iter().map(|(t, since)| self.fetch(t, *since))).await
    }

    /// Punches newer than `since`, retrying connect+fetch. Never fails: after
    /// the last attempt, or once shutdown is requested, it returns an empty,
    /// incomplete result.
    pub async fn fetch(&self, terminal: &TerminalConfig, since: NaiveDateTime) -> TerminalFetch {
        for attempt in 1..=self.retries {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.attempt(terminal).await {
                Ok(mut events) => {
                    self.note_reachability(terminal, true);
                    events.retain(|e| e.occurred_at > since);
                    events.sort_by_key(|e| e.occurred_at);
                    tracing::info!(
                        terminal = %terminal.id,
                        count = events.len(),
                        %since,
                        "fetched punches from terminal"
                    );
                    return TerminalFetch {
                        terminal_id: terminal.id.clone(),
                        events,
                        complete: true,
                    };
                }
                Err(e) => {
                    tracing::error!(
                        terminal = %terminal.id,
                        address = %terminal.address,
                        attempt,
                        error = %e,
                        "error fetching data from terminal"
                    );
                    if attempt < self.retries {
                        tracing::info!(
                            delay_secs = self.retry_delay.as_secs(),
                            "retrying terminal fetch"
                        );
                        tokio::select! {
                            _ = self.shutdown.cancelled() => break,
                            _ = tokio::time::sleep(self.retry_delay) => {}
                        }
                    }
                }
            }
        }

        if self.shutdown.is_cancelled() {
            tracing::info!(terminal = %terminal.id, "terminal fetch interrupted by shutdown");
            return TerminalFetch {
                terminal_id: terminal.id.clone(),
                events: Vec::new(),
                complete: false,
            };
        }

        self.note_reachability(terminal, false);
        TerminalFetch {
            terminal_id: terminal.id.clone(),
            events: Vec::new(),
            complete: false,
        }
    }

    async fn attempt(&self, terminal: &TerminalConfig) -> Result<Vec<RawPunchEvent>, TerminalError> {
        let mut session = tokio::time::timeout(
            self.timeout,
            self.driver.connect(terminal, self.timeout),
        )
        .await
        .map_err(|_| TerminalError::Timeout(self.timeout))??;

        let result = tokio::time::timeout(self.timeout, self.driver.fetch_events(&mut session))
            .await
            .unwrap_or(Err(TerminalError::Timeout(self.timeout)));

        self.driver.disconnect(session).await;
        result
    }

    /// Log only changes in reachability, not every poll.
    fn note_reachability(&self, terminal: &TerminalConfig, reachable: bool) {
        let mut states = self.reachable.lock().unwrap_or_else(|e| e.into_inner());
        let previous = states.insert(terminal.id.clone(), reachable);
        match (previous, reachable) {
            (Some(false), true) => {
                tracing::info!(terminal = %terminal.id, address = %terminal.address, "terminal is reachable again");
            }
            (Some(true) | None, false) => {
                tracing::error!(
                    terminal = %terminal.id,
                    address = %terminal.address,
                    attempts = self.retries,
                    "terminal unreachable, contributing no punches this batch"
                );
            }
            _ => {}
        }
    }
}
