use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub source: String,
    /// Punches at or before this instant are considered synced.
    pub synced_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
