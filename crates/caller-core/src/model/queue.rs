// ── Queue tabs and pages ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::de;
use super::patient::{PatientQueueEntry, PatientState};
use crate::config::DEFAULT_PAGE_SIZE;

/// The three queue views a station can show.
///
/// Each tab is a server-side filter (`pat_type`), not a slice of one
/// client-held list: switching tabs re-queries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueueTab {
    #[default]
    Waiting,
    Pass,
    End,
}

impl QueueTab {
    /// Backend `pat_type` filter for this tab.
    pub fn pat_type(self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Pass => 1,
            Self::End => 2,
        }
    }

    /// Whether an entry in `state` belongs on this tab.
    ///
    /// The waiting tab also shows the patient currently being called.
    /// Unknown states are trusted to the backend's own tab filter.
    pub fn accepts(self, state: PatientState) -> bool {
        if let PatientState::Other(_) = state {
            return true;
        }
        match self {
            Self::Waiting => matches!(
                state,
                PatientState::Calling
                    | PatientState::Priority
                    | PatientState::Waiting
                    | PatientState::Revisit
            ),
            Self::Pass => state == PatientState::Passed,
            Self::End => state == PatientState::Ended,
        }
    }
}

/// Counters the list endpoint echoes alongside a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueMeta {
    pub wait_count: u32,
    pub pass_count: u32,
    pub end_count: u32,
    pub call_count: u32,
}

/// Pagination cursor for the active tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePage {
    pub page_num: u32,
    pub page_size: u32,
    pub total: u64,
}

impl Default for QueuePage {
    fn default() -> Self {
        Self {
            page_num: 1,
            page_size: DEFAULT_PAGE_SIZE,
            total: 0,
        }
    }
}

/// Decoded `line/list` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListPage {
    #[serde(deserialize_with = "de::null_default")]
    pub list: Vec<PatientQueueEntry>,
    pub total: u64,
    #[serde(deserialize_with = "de::null_default")]
    pub meta: QueueMeta,
}
