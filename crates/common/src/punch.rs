use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Wall-clock format used by terminals and the downstream checkin resource.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "IN",
            Self::Out => "OUT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A punch exactly as a terminal reported it.
///
/// `occurred_at` is the terminal's local wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPunchEvent {
    pub terminal_id: String,
    pub user_id: String,
    pub occurred_at: NaiveDateTime,
    pub raw_code: Option<i32>,
}

/// Natural key of a logical event: the same employee punching at the same
/// second is the same event, whichever terminal or fetch produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub employee_id: String,
    pub occurred_at: NaiveDateTime,
}

impl IdentityKey {
    pub fn new(employee_id: impl Into<String>, occurred_at: NaiveDateTime) -> Self {
        Self {
            employee_id: employee_id.into(),
            occurred_at,
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}",
            self.employee_id,
            self.occurred_at.format(TIMESTAMP_FORMAT)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalEvent {
    pub employee_id: String,
    pub occurred_at: NaiveDateTime,
    pub direction: Direction,
    /// Terminal that first reported the punch. Not part of the identity.
    pub terminal_id: String,
}

impl LogicalEvent {
    pub fn key(&self) -> IdentityKey {
        IdentityKey::new(self.employee_id.clone(), self.occurred_at)
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    AlreadyExists,
    EmployeeNotActive,
    TransientFailure(String),
    RejectedByDownstream(String),
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::AlreadyExists => "already_exists",
            Self::EmployeeNotActive => "employee_not_active",
            Self::TransientFailure(_) => "transient_failure",
            Self::RejectedByDownstream(_) => "rejected_by_downstream",
        }
    }
}

/// Durable per-key outcome kept in the delivery ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOutcome {
    Delivered,
    NotActive,
    PermanentlyFailed,
}

impl LedgerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::NotActive => "not_active",
            Self::PermanentlyFailed => "permanently_failed",
        }
    }
}

impl FromStr for LedgerOutcome {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "delivered" => Ok(Self::Delivered),
            "not_active" => Ok(Self::NotActive),
            "permanently_failed" => Ok(Self::PermanentlyFailed),
            _ => Err(format!("unknown ledger outcome: {value}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn identity_key_ignores_direction_and_terminal() {
        let a = LogicalEvent {
            employee_id: "T000007".into(),
            occurred_at: at(8, 5),
            direction: Direction::In,
            terminal_id: "1".into(),
        };
        let b = LogicalEvent {
            direction: Direction::Out,
            terminal_id: "2".into(),
            ..a.clone()
        };
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn identity_key_display_uses_wall_clock_format() {
        let key = IdentityKey::new("T000007", at(8, 5));
        assert_eq!(key.to_string(), "T000007@2024-01-10 08:05:00");
    }

    #[test]
    fn ledger_outcome_round_trips_through_str() {
        for outcome in [
            LedgerOutcome::Delivered,
            LedgerOutcome::NotActive,
            LedgerOutcome::PermanentlyFailed,
        ] {
            assert_eq!(outcome.as_str().parse::<LedgerOutcome>(), Ok(outcome));
        }
        assert!("sent".parse::<LedgerOutcome>().is_err());
    }

    #[test]
    fn direction_displays_as_log_type() {
        assert_eq!(Direction::In.to_string(), "IN");
        assert_eq!(Direction::Out.to_string(), "OUT");
    }
}
