use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

use punchsync_common::punch::{RawPunchEvent, TIMESTAMP_FORMAT};

/// One attendance record as served by the terminal bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeAttendance {
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    #[serde(with = "wall_clock")]
    pub timestamp: NaiveDateTime,
    #[serde(default)]
    pub punch: Option<i32>,
}

impl BridgeAttendance {
    pub fn into_raw(self, terminal_id: &str) -> RawPunchEvent {
        RawPunchEvent {
            terminal_id: terminal_id.to_owned(),
            user_id: self.user_id,
            occurred_at: self.timestamp,
            raw_code: self.punch,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

mod wall_clock {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}
