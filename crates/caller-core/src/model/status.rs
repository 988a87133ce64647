// ── Doctor status counters ──

use serde::{Deserialize, Serialize};

use super::de;

/// Whether the doctor is currently seeing patients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum DoctorState {
    Stopped,
    #[default]
    Started,
}

impl From<i64> for DoctorState {
    fn from(code: i64) -> Self {
        if code == 0 { Self::Stopped } else { Self::Started }
    }
}

impl From<DoctorState> for i64 {
    fn from(state: DoctorState) -> Self {
        match state {
            DoctorState::Stopped => 0,
            DoctorState::Started => 1,
        }
    }
}

impl std::fmt::Display for DoctorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Started => "started",
        })
    }
}

/// Live counters for the bound doctor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorStatus {
    pub dept: String,
    pub doc: i64,
    pub status: DoctorState,
    pub queue_type: i64,
    pub wait_count: u32,
    pub pass_count: u32,
    pub end_count: u32,
    pub call_count: u32,
}

/// A broker-pushed status update. Absent fields leave the local value
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StatusDelta {
    #[serde(alias = "doc_id", deserialize_with = "de::opt_lenient_i64")]
    pub doc: Option<i64>,
    #[serde(deserialize_with = "de::opt_string_or_number")]
    pub dept: Option<String>,
    pub status: Option<DoctorState>,
    pub wait_count: Option<u32>,
    pub pass_count: Option<u32>,
    pub end_count: Option<u32>,
    pub call_count: Option<u32>,
}

impl StatusDelta {
    /// Overwrite the fields this delta carries. Returns whether anything
    /// changed.
    pub fn apply_to(&self, status: &mut DoctorStatus) -> bool {
        let before = status.clone();

        if let Some(v) = self.wait_count {
            status.wait_count = v;
        }
        if let Some(v) = self.pass_count {
            status.pass_count = v;
        }
        if let Some(v) = self.end_count {
            status.end_count = v;
        }
        if let Some(v) = self.call_count {
            status.call_count = v;
        }
        if let Some(v) = self.status {
            status.status = v;
        }
        if let Some(v) = &self.dept {
            status.dept.clone_from(v);
        }

        *status != before
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn delta_overwrites_only_present_counters() {
        let mut status = DoctorStatus {
            doc: 7,
            wait_count: 10,
            pass_count: 2,
            end_count: 5,
            ..DoctorStatus::default()
        };
        let delta: StatusDelta = serde_json::from_value(json!({ "doc": 7, "wait_count": 4 })).unwrap();

        assert!(delta.apply_to(&mut status));
        assert_eq!(status.wait_count, 4);
        assert_eq!(status.pass_count, 2);
        assert_eq!(status.end_count, 5);
    }

    #[test]
    fn identical_delta_reports_no_change() {
        let mut status = DoctorStatus {
            wait_count: 4,
            ..DoctorStatus::default()
        };
        let delta = StatusDelta {
            wait_count: Some(4),
            ..StatusDelta::default()
        };
        assert!(!delta.apply_to(&mut status));
    }

    #[test]
    fn negative_counter_is_malformed() {
        let result = serde_json::from_value::<StatusDelta>(json!({ "doc": 7, "wait_count": -1 }));
        assert!(result.is_err());
    }

    #[test]
    fn doctor_state_decodes_from_integer() {
        let delta: StatusDelta = serde_json::from_value(json!({ "doc_id": "7", "status": 0 })).unwrap();
        assert_eq!(delta.doc, Some(7));
        assert_eq!(delta.status, Some(DoctorState::Stopped));
    }
}
