use std::time::Duration;

use async_trait::async_trait;

use punchsync_common::punch::RawPunchEvent;
use punchsync_config::TerminalConfig;

#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Transport to one kind of attendance terminal.
///
/// Every session obtained from `connect` must be handed back to
/// `disconnect`, whether or not the fetch succeeded.
#[async_trait]
pub trait TerminalDriver: Send + Sync {
    type Session: Send;

    async fn connect(
        &self,
        terminal: &TerminalConfig,
        timeout: Duration,
    ) -> Result<Self::Session, TerminalError>;

    /// Every punch the terminal currently holds.
    async fn fetch_events(
        &self,
        session: &mut Self::Session,
    ) -> Result<Vec<RawPunchEvent>, TerminalError>;

    async fn disconnect(&self, session: Self::Session);
}
