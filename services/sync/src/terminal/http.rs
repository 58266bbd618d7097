use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use punchsync_common::punch::RawPunchEvent;
use punchsync_config::TerminalConfig;

use super::driver::{TerminalDriver, TerminalError};
use super::models::BridgeAttendance;

/// Driver for terminals exposed through an HTTP bridge:
/// `GET {address}/ping` to connect, `GET {address}/attendance` to fetch.
#[derive(Clone)]
pub struct HttpTerminalDriver {
    client: Client,
}

pub struct HttpSession {
    terminal_id: String,
    base_url: String,
    timeout: Duration,
}

impl HttpTerminalDriver {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }
}

fn base_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_owned()
    } else {
        format!("http://{address}")
    }
}

#[async_trait]
impl TerminalDriver for HttpTerminalDriver {
    type Session = HttpSession;

    async fn connect(
        &self,
        terminal: &TerminalConfig,
        timeout: Duration,
    ) -> Result<HttpSession, TerminalError> {
        let base_url = base_url(&terminal.address);
        let connect_error = |reason: String| TerminalError::Connect {
            address: terminal.address.clone(),
            reason,
        };

        let response = self
            .client
            .get(format!("{base_url}/ping"))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| connect_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(connect_error(format!("ping returned {}", response.status())));
        }

        Ok(HttpSession {
            terminal_id: terminal.id.clone(),
            base_url,
            timeout,
        })
    }

    async fn fetch_events(
        &self,
        session: &mut HttpSession,
    ) -> Result<Vec<RawPunchEvent>, TerminalError> {
        let response = self
            .client
            .get(format!("{}/attendance", session.base_url))
            .timeout(session.timeout)
            .send()
            .await
            .map_err(|e| TerminalError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TerminalError::Fetch(format!("HTTP {status}: {body}")));
        }

        let records: Vec<BridgeAttendance> = response
            .json()
            .await
            .map_err(|e| TerminalError::Fetch(e.to_string()))?;

        Ok(records
            .into_iter()
            .map(|r| r.into_raw(&session.terminal_id))
            .collect())
    }

    async fn disconnect(&self, session: HttpSession) {
        tracing::debug!(terminal = %session.terminal_id, "terminal session released");
    }
}
