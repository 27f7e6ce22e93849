// Shared record types
// Signals, history copies, feedback and lessons as they are persisted on disk

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Separator between the asset and the timestamp part of a signal id
pub const ID_SEPARATOR: char = '_';

/// Timestamp layout used in generated signal ids
pub const ID_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Predicted price direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    #[serde(rename = "UP", alias = "up", alias = "CALL")]
    Up,
    #[serde(rename = "DOWN", alias = "down", alias = "PUT")]
    Down,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UP" | "CALL" => Ok(Direction::Up),
            "DOWN" | "PUT" => Ok(Direction::Down),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

/// A short-lived trading recommendation
///
/// Only the named fields are interpreted by the store. Anything else the
/// generator attached (volatility, indicator readings, entry delay) is kept
/// in `extra` and written back unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub id: String,
    pub asset: String,
    pub direction: Direction,
    pub confidence: f64, // 0.0 to 1.0
    /// Wall-clock entry time, "HH:MM", no date component
    pub entry_time: String,
    #[serde(default, alias = "duration", skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(with = "timestamp")]
    pub generated_at: DateTime<FixedOffset>,
    #[serde(default)]
    pub reason: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A signal copy appended to the rolling history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub signal: Signal,
    #[serde(with = "timestamp", alias = "history_saved_at")]
    pub saved_at: DateTime<FixedOffset>,
    #[serde(default = "Uuid::new_v4")]
    pub history_id: Uuid,
}

impl HistoryEntry {
    pub fn new(signal: Signal, saved_at: DateTime<FixedOffset>) -> Self {
        Self {
            signal,
            saved_at,
            history_id: Uuid::new_v4(),
        }
    }
}

/// User judgement about how a signal played out
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackEntry {
    pub signal_id: String,
    pub success: bool,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(with = "timestamp")]
    pub recorded_at: DateTime<FixedOffset>,
    #[serde(default)]
    pub learned: bool,
}

/// Immutable record derived once from a feedback entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lesson {
    pub signal_id: String,
    pub success: bool,
    #[serde(default)]
    pub asset: String,
    #[serde(with = "timestamp")]
    pub source_feedback_at: DateTime<FixedOffset>,
    #[serde(with = "timestamp")]
    pub learned_at: DateTime<FixedOffset>,
}

impl Lesson {
    pub fn from_feedback(entry: &FeedbackEntry, learned_at: DateTime<FixedOffset>) -> Self {
        Self {
            signal_id: entry.signal_id.clone(),
            success: entry.success,
            asset: asset_from_signal_id(&entry.signal_id).to_string(),
            source_feedback_at: entry.recorded_at,
            learned_at,
        }
    }
}

/// Build a signal id from the asset and the generation time
pub fn signal_id(asset: &str, generated_at: &DateTime<FixedOffset>) -> String {
    format!(
        "{}{}{}",
        asset,
        ID_SEPARATOR,
        generated_at.format(ID_TIMESTAMP_FORMAT)
    )
}

/// Asset prefix of a signal id, or "" when the id has no separator
pub fn asset_from_signal_id(signal_id: &str) -> &str {
    signal_id
        .split_once(ID_SEPARATOR)
        .map(|(asset, _)| asset)
        .unwrap_or("")
}

/// Serde helpers for timestamps
///
/// Writes RFC 3339 with offset. Reads RFC 3339, and also the naive
/// `YYYY-MM-DDTHH:MM:SS[.f]` form older files contain, taken as UTC.
pub mod timestamp {
    use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Result<DateTime<FixedOffset>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt);
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .map(|naive| Utc.from_utc_datetime(&naive).fixed_offset())
            .map_err(|e| format!("invalid timestamp '{}': {}", raw, e))
    }

    pub fn serialize<S>(value: &DateTime<FixedOffset>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::{DateTime, FixedOffset};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(
            value: &Option<DateTime<FixedOffset>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            match raw {
                Some(raw) => super::parse(&raw).map(Some).map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}
