//! Punch direction and employee id derivation.
//!
//! Direction priority:
//!   1. explicit terminal punch code, when configured as IN or OUT
//!   2. time-of-day window: `[start_hour, end_hour)` is IN
//!   3. everything else is OUT

use chrono::Timelike;

use punchsync_common::punch::{Direction, LogicalEvent, RawPunchEvent};
use punchsync_config::{EmployeeIdConfig, InWindow, PunchCodes};

#[derive(Debug, Clone)]
pub struct EmployeeIdFormat {
    prefix: String,
    width: usize,
}

impl EmployeeIdFormat {
    pub fn new(config: &EmployeeIdConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            width: config.width,
        }
    }

    /// `7` becomes `T000007` with the default prefix and width.
    /// Returns `None` for user ids that are not plain numbers.
    pub fn format(&self, user_id: &str) -> Option<String> {
        let number: u64 = user_id.trim().parse().ok()?;
        Some(format!(
            "{}{:0width$}",
            self.prefix,
            number,
            width = self.width
        ))
    }
}

#[derive(Debug, Clone)]
pub struct PunchClassifier {
    window: InWindow,
    codes: PunchCodes,
    ids: EmployeeIdFormat,
}

impl PunchClassifier {
    pub fn new(window: InWindow, codes: PunchCodes, ids: EmployeeIdFormat) -> Self {
        Self { window, codes, ids }
    }

    pub fn classify(&self, raw: &RawPunchEvent) -> Direction {
        if let Some(code) = raw.raw_code {
            if self.codes.in_codes.contains(&code) {
                return Direction::In;
            }
            if self.codes.out_codes.contains(&code) {
                return Direction::Out;
            }
        }

        if self.window.contains_hour(raw.occurred_at.hour()) {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// Canonicalize a raw punch. `None` when the user id cannot be mapped to
    /// an employee id.
    pub fn to_logical(&self, raw: &RawPunchEvent) -> Option<LogicalEvent> {
        let employee_id = self.ids.format(&raw.user_id)?;
        Some(LogicalEvent {
            employee_id,
            occurred_at: raw.occurred_at,
            direction: self.classify(raw),
            terminal_id: raw.terminal_id.clone(),
        })
    }
}
