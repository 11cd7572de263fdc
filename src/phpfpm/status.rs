//! php-fpm status payload model and decoder.
//!
//! Field names follow php-fpm's `?json&full` output exactly (space separated
//! keys such as `"start since"` or `"last request cpu"`). Missing fields decode
//! to their zero value; malformed fields fail the whole document, except for
//! `"request duration"` which php-fpm is known to overflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::phpfpm::repair::repair_payload;

/// Lifecycle state of a php-fpm worker as reported in the `state` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProcessState {
    Idle,
    Running,
    Finishing,
    ReadingHeaders,
    GettingRequestInfo,
    Ending,
    /// Any value php-fpm reports that is not one of the known states.
    Unknown(String),
}

impl ProcessState {
    /// Every state php-fpm is known to report.
    pub const KNOWN: [ProcessState; 6] = [
        ProcessState::Idle,
        ProcessState::Running,
        ProcessState::Finishing,
        ProcessState::ReadingHeaders,
        ProcessState::GettingRequestInfo,
        ProcessState::Ending,
    ];

    /// Wire representation of the state.
    pub fn as_str(&self) -> &str {
        match self {
            ProcessState::Idle => "Idle",
            ProcessState::Running => "Running",
            ProcessState::Finishing => "Finishing",
            ProcessState::ReadingHeaders => "Reading headers",
            ProcessState::GettingRequestInfo => "Getting request informations",
            ProcessState::Ending => "Ending",
            ProcessState::Unknown(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ProcessState::Unknown(_))
    }
}

impl Default for ProcessState {
    fn default() -> Self {
        ProcessState::Unknown(String::new())
    }
}

impl From<String> for ProcessState {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "Idle" => ProcessState::Idle,
            "Running" => ProcessState::Running,
            "Finishing" => ProcessState::Finishing,
            "Reading headers" => ProcessState::ReadingHeaders,
            // php-fpm spells it "informations"; accept the corrected form too.
            "Getting request informations" | "Getting request information" => {
                ProcessState::GettingRequestInfo
            }
            "Ending" => ProcessState::Ending,
            _ => ProcessState::Unknown(raw),
        }
    }
}

impl From<ProcessState> for String {
    fn from(state: ProcessState) -> Self {
        match state {
            ProcessState::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codec for timestamps that php-fpm emits as bare Unix epoch seconds.
pub mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(value.timestamp())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = i64::deserialize(deserializer)?;
        DateTime::from_timestamp(seconds, 0)
            .ok_or_else(|| D::Error::custom(format!("timestamp {seconds} is out of range")))
    }
}

/// Codec for `"request duration"` (microseconds).
///
/// php-fpm occasionally reports durations that do not fit a signed 64-bit
/// integer (https://bugs.php.net/bug.php?id=62382). Those decode to zero.
/// Fractional and non-numeric values are still rejected.
pub mod request_duration {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(value: &i64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(*value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = i64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an integer request duration")
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<i64, E> {
            Ok(value)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<i64, E> {
            Ok(i64::try_from(value).unwrap_or(0))
        }

        // serde_json hands integer literals beyond u64 over as floats.
        fn visit_f64<E: de::Error>(self, value: f64) -> Result<i64, E> {
            let integral = value.is_finite() && value.fract() == 0.0;
            let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
            if integral && !in_range {
                Ok(0)
            } else {
                Err(E::invalid_type(de::Unexpected::Float(value), &self))
            }
        }
    }
}

/// One php-fpm worker process at scrape time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSnapshot {
    pub pid: i64,
    pub state: ProcessState,
    #[serde(rename = "start time", with = "epoch_seconds")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "start since")]
    pub start_since: i64,
    pub requests: i64,
    #[serde(rename = "request duration", with = "request_duration")]
    pub request_duration: i64,
    #[serde(rename = "request method")]
    pub request_method: String,
    #[serde(rename = "request uri")]
    pub request_uri: String,
    #[serde(rename = "content length")]
    pub content_length: i64,
    pub user: String,
    pub script: String,
    #[serde(rename = "last request cpu")]
    pub last_request_cpu: f64,
    #[serde(rename = "last request memory")]
    pub last_request_memory: i64,
}

/// Pool-level fields of the php-fpm status page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolStatus {
    #[serde(rename = "pool")]
    pub name: String,
    #[serde(rename = "process manager")]
    pub process_manager: String,
    #[serde(rename = "start time", with = "epoch_seconds")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "start since")]
    pub start_since: i64,
    #[serde(rename = "accepted conn")]
    pub accepted_connections: i64,
    #[serde(rename = "listen queue")]
    pub listen_queue: i64,
    #[serde(rename = "max listen queue")]
    pub max_listen_queue: i64,
    #[serde(rename = "listen queue len")]
    pub listen_queue_length: i64,
    #[serde(rename = "idle processes")]
    pub idle_processes: i64,
    #[serde(rename = "active processes")]
    pub active_processes: i64,
    #[serde(rename = "total processes")]
    pub total_processes: i64,
    #[serde(rename = "max active processes")]
    pub max_active_processes: i64,
    #[serde(rename = "max children reached")]
    pub max_children_reached: i64,
    #[serde(rename = "slow requests")]
    pub slow_requests: i64,
    pub processes: Vec<ProcessSnapshot>,
}

/// The status payload could not be decoded, even after repair.
#[derive(Debug, Error)]
#[error("failed to decode php-fpm status: {source} (payload: {payload})")]
pub struct DecodeError {
    pub source: serde_json::Error,
    /// Raw payload as received, for diagnosis.
    pub payload: String,
}

/// Repairs and decodes a raw status payload.
pub fn decode_status(content: &[u8]) -> Result<PoolStatus, DecodeError> {
    let repaired = repair_payload(content);
    serde_json::from_slice(&repaired).map_err(|source| DecodeError {
        source,
        payload: String::from_utf8_lossy(content).into_owned(),
    })
}
