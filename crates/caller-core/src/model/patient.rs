// ── Queue entries ──

use std::fmt;

use serde::{Deserialize, Serialize};

use super::de;

/// Where an appointment sits in the doctor's queue.
///
/// Encoded on the wire as a bare integer. Unknown codes are preserved and
/// such rows stay on whichever tab the backend listed them for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum PatientState {
    Calling,
    Priority,
    #[default]
    Waiting,
    Revisit,
    Passed,
    Ended,
    Other(i64),
}

impl PatientState {
    pub fn code(self) -> i64 {
        match self {
            Self::Calling => 0,
            Self::Priority => 1,
            Self::Waiting => 2,
            Self::Revisit => 3,
            Self::Passed => 4,
            Self::Ended => 99,
            Self::Other(code) => code,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Calling => "calling",
            Self::Priority => "priority",
            Self::Waiting => "waiting",
            Self::Revisit => "revisit",
            Self::Passed => "passed",
            Self::Ended => "ended",
            Self::Other(_) => "unknown",
        }
    }
}

impl From<i64> for PatientState {
    fn from(code: i64) -> Self {
        match code {
            0 => Self::Calling,
            1 => Self::Priority,
            2 => Self::Waiting,
            3 => Self::Revisit,
            4 => Self::Passed,
            99 => Self::Ended,
            other => Self::Other(other),
        }
    }
}

impl From<PatientState> for i64 {
    fn from(state: PatientState) -> Self {
        state.code()
    }
}

impl fmt::Display for PatientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "unknown({code})"),
            known => f.write_str(known.label()),
        }
    }
}

/// One row of the doctor's queue. Replaced wholesale on every refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientQueueEntry {
    /// Patient record id.
    #[serde(deserialize_with = "de::string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "de::string_or_number")]
    pub appointment_id: String,
    #[serde(alias = "name", alias = "pat_name", deserialize_with = "de::string_or_number")]
    pub patient_name: String,
    #[serde(alias = "queue_number", deserialize_with = "de::opt_string_or_number")]
    pub queue_no: Option<String>,
    #[serde(deserialize_with = "de::opt_lenient_i64")]
    pub gender: Option<i64>,
    #[serde(deserialize_with = "de::opt_lenient_i64")]
    pub age: Option<i64>,
    pub state: PatientState,
    #[serde(deserialize_with = "de::opt_lenient_i64")]
    pub doc_id: Option<i64>,
    #[serde(deserialize_with = "de::opt_string_or_number")]
    pub room_name: Option<String>,
    #[serde(alias = "created_at", deserialize_with = "de::opt_string_or_number")]
    pub register_time: Option<String>,
}
