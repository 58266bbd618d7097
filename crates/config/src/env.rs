use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use punchsync_common::error::{PunchsyncError, PunchsyncResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalConfig {
    pub id: String,
    pub address: String,
}

/// Hours of the day (`[start_hour, end_hour)`) whose punches count as IN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for InWindow {
    fn default() -> Self {
        Self {
            start_hour: 8,
            end_hour: 15,
        }
    }
}

impl InWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> PunchsyncResult<Self> {
        if start_hour >= end_hour || end_hour > 24 {
            return Err(PunchsyncError::Config(format!(
                "invalid IN window [{start_hour}, {end_hour}): need start < end <= 24"
            )));
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        self.start_hour <= hour && hour < self.end_hour
    }
}

/// Terminal punch codes that override the time window when present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PunchCodes {
    pub in_codes: Vec<i32>,
    pub out_codes: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployeeIdConfig {
    pub prefix: String,
    pub width: usize,
}

impl Default for EmployeeIdConfig {
    fn default() -> Self {
        Self {
            prefix: "T".to_owned(),
            width: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub sync_interval_secs: u64,
    pub fetch_retries: u32,
    pub fetch_retry_delay_secs: u64,
    pub fetch_timeout_secs: u64,
    pub max_consecutive_failures: u32,
    pub backoff_secs: u64,
    pub delivery_concurrency: usize,
    pub max_delivery_attempts: u32,
    pub ledger_grace_hours: u32,
    pub error_tail_lines: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_interval_secs: 180,
            fetch_retries: 3,
            fetch_retry_delay_secs: 5,
            fetch_timeout_secs: 60,
            max_consecutive_failures: 5,
            backoff_secs: 120,
            delivery_concurrency: 4,
            max_delivery_attempts: 3,
            ledger_grace_hours: 24,
            error_tail_lines: 20,
        }
    }
}

impl SyncSettings {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn fetch_retry_delay(&self) -> Duration {
        Duration::from_secs(self.fetch_retry_delay_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// Mail relay for escalations. STARTTLS on `port`, login when credentials
/// are given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifierConfig {
    /// JSON webhook receiving escalations. Takes precedence over SMTP.
    pub webhook_url: Option<String>,
    /// Email escalations. Log-only when neither channel is set.
    pub smtp: Option<SmtpConfig>,
}

impl NotifierConfig {
    fn from_env() -> PunchsyncResult<Self> {
        let smtp = match non_empty_var("SMTP_SERVER") {
            Some(server) => {
                let username = non_empty_var("SMTP_USERNAME");
                let password = non_empty_var("SMTP_PASSWORD");
                if username.is_some() != password.is_some() {
                    return Err(PunchsyncError::Config(
                        "SMTP_USERNAME and SMTP_PASSWORD must be set together".to_owned(),
                    ));
                }
                Some(SmtpConfig {
                    server,
                    port: parse_var_or("SMTP_PORT", 587)?,
                    username,
                    password,
                    from: get_var("NOTIFY_EMAIL_FROM")?,
                    to: get_var("NOTIFY_EMAIL_TO")?,
                })
            }
            None => None,
        };

        Ok(Self {
            webhook_url: non_empty_var("NOTIFY_WEBHOOK_URL"),
            smtp,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub terminals: Vec<TerminalConfig>,
    pub in_window: InWindow,
    pub punch_codes: PunchCodes,
    pub employee_id: EmployeeIdConfig,
    pub sync: SyncSettings,
    pub downstream: DownstreamConfig,
    pub notifier: NotifierConfig,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads and validates every setting.
    pub fn from_env() -> PunchsyncResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        let defaults = SyncSettings::default();
        let sync = SyncSettings {
            sync_interval_secs: parse_var_or("SYNC_INTERVAL_SECS", defaults.sync_interval_secs)?,
            fetch_retries: parse_var_or("FETCH_RETRIES", defaults.fetch_retries)?,
            fetch_retry_delay_secs: parse_var_or(
                "FETCH_RETRY_DELAY_SECS",
                defaults.fetch_retry_delay_secs,
            )?,
            fetch_timeout_secs: parse_var_or("FETCH_TIMEOUT_SECS", defaults.fetch_timeout_secs)?,
            max_consecutive_failures: parse_var_or(
                "MAX_CONSECUTIVE_FAILURES",
                defaults.max_consecutive_failures,
            )?,
            backoff_secs: parse_var_or("BACKOFF_SECS", defaults.backoff_secs)?,
            delivery_concurrency: parse_var_or(
                "DELIVERY_CONCURRENCY",
                defaults.delivery_concurrency,
            )?,
            max_delivery_attempts: parse_var_or(
                "MAX_DELIVERY_ATTEMPTS",
                defaults.max_delivery_attempts,
            )?,
            ledger_grace_hours: parse_var_or("LEDGER_GRACE_HOURS", defaults.ledger_grace_hours)?,
            error_tail_lines: parse_var_or("ERROR_TAIL_LINES", defaults.error_tail_lines)?,
        };

        let window_defaults = InWindow::default();
        let in_window = InWindow::new(
            parse_var_or("IN_WINDOW_START_HOUR", window_defaults.start_hour)?,
            parse_var_or("IN_WINDOW_END_HOUR", window_defaults.end_hour)?,
        )?;

        let id_defaults = EmployeeIdConfig::default();
        let employee_id = EmployeeIdConfig {
            prefix: get_var_or("EMPLOYEE_ID_PREFIX", &id_defaults.prefix),
            width: parse_var_or("EMPLOYEE_ID_WIDTH", id_defaults.width)?,
        };

        let downstream = DownstreamConfig {
            base_url: get_var("ERPNEXT_URL")?.trim_end_matches('/').to_owned(),
            api_key: get_var("ERPNEXT_API_KEY")?,
            api_secret: get_var("ERPNEXT_API_SECRET")?,
            timeout_secs: parse_var_or("ERPNEXT_TIMEOUT_SECS", 30)?,
            max_retries: parse_var_or("ERPNEXT_MAX_RETRIES", 2)?,
        };

        let config = Self {
            database_url: get_var_or("DATABASE_URL", "sqlite://punchsync.db"),
            terminals: parse_terminals(&get_var("TERMINALS")?)?,
            in_window,
            punch_codes: PunchCodes {
                in_codes: parse_codes("PUNCH_CODES_IN")?,
                out_codes: parse_codes("PUNCH_CODES_OUT")?,
            },
            employee_id,
            sync,
            downstream,
            notifier: NotifierConfig::from_env()?,
            log_level: get_var_or("LOG_LEVEL", "info"),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the daemon cannot run with.
    pub fn validate(&self) -> PunchsyncResult<()> {
        if self.terminals.is_empty() {
            return Err(PunchsyncError::Config(
                "at least one terminal must be configured".to_owned(),
            ));
        }
        let mut seen = HashSet::new();
        for terminal in &self.terminals {
            if !seen.insert(terminal.id.as_str()) {
                return Err(PunchsyncError::Config(format!(
                    "duplicate terminal id: {}",
                    terminal.id
                )));
            }
        }
        if self.sync.fetch_retries == 0 {
            return Err(PunchsyncError::Config("FETCH_RETRIES must be >= 1".to_owned()));
        }
        if self.sync.delivery_concurrency == 0 {
            return Err(PunchsyncError::Config(
                "DELIVERY_CONCURRENCY must be >= 1".to_owned(),
            ));
        }
        if self.sync.max_consecutive_failures == 0 {
            return Err(PunchsyncError::Config(
                "MAX_CONSECUTIVE_FAILURES must be >= 1".to_owned(),
            ));
        }
        if self.sync.max_delivery_attempts == 0 {
            return Err(PunchsyncError::Config(
                "MAX_DELIVERY_ATTEMPTS must be >= 1".to_owned(),
            ));
        }
        if let Some(code) = self
            .punch_codes
            .in_codes
            .iter()
            .find(|c| self.punch_codes.out_codes.contains(c))
        {
            return Err(PunchsyncError::Config(format!(
                "punch code {code} is listed as both IN and OUT"
            )));
        }
        Ok(())
    }
}

/// Parse `id@address` entries separated by commas.
pub fn parse_terminals(raw: &str) -> PunchsyncResult<Vec<TerminalConfig>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (id, address) = entry.split_once('@').ok_or_else(|| {
                PunchsyncError::Config(format!("terminal entry `{entry}` must be id@address"))
            })?;
            let (id, address) = (id.trim(), address.trim());
            if id.is_empty() || address.is_empty() {
                return Err(PunchsyncError::Config(format!(
                    "terminal entry `{entry}` has an empty id or address"
                )));
            }
            Ok(TerminalConfig {
                id: id.to_owned(),
                address: address.to_owned(),
            })
        })
        .collect()
}

fn parse_codes(key: &str) -> PunchsyncResult<Vec<i32>> {
    let raw = match env::var(key) {
        Ok(v) => v,
        Err(_) => return Ok(Vec::new()),
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|e| PunchsyncError::Config(format!("invalid {key} entry `{s}`: {e}")))
        })
        .collect()
}

fn get_var(key: &str) -> PunchsyncResult<String> {
    env::var(key).map_err(|_| PunchsyncError::Config(format!("{key} is required but not set")))
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var_or<T>(key: &str, default: T) -> PunchsyncResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| PunchsyncError::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}
