use serde::{Deserialize, Serialize};

use punchsync_common::punch::{LogicalEvent, TIMESTAMP_FORMAT};

/// Envelope of every ERPNext resource response.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDoc<T> {
    pub data: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmployeeRecord {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckinRecord {
    pub name: String,
}

/// Body of `POST /api/resource/Employee Checkin`.
#[derive(Debug, Clone, Serialize)]
pub struct NewCheckin {
    pub employee: String,
    pub time: String,
    pub log_type: String,
    pub device_id: String,
}

impl From<&LogicalEvent> for NewCheckin {
    fn from(event: &LogicalEvent) -> Self {
        Self {
            employee: event.employee_id.clone(),
            time: event.occurred_at.format(TIMESTAMP_FORMAT).to_string(),
            log_type: event.direction.as_str().to_owned(),
            device_id: event.terminal_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmployeeStatus {
    Active,
    Inactive,
    NotFound,
}

impl EmployeeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::NotFound => "not_found",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created { name: String },
    /// Downstream reported a conflicting record (HTTP 409).
    Duplicate,
    /// Any other 4xx: the request itself is unacceptable.
    Rejected { reason: String },
}
