// ── Consultation pointers ──

use serde::{Deserialize, Serialize};

use super::de;
use super::patient::PatientQueueEntry;

/// The single patient currently in consultation with the bound doctor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveVisit {
    #[serde(deserialize_with = "de::string_or_number")]
    pub appointment_id: String,
    #[serde(alias = "id", deserialize_with = "de::opt_string_or_number")]
    pub patient_id: Option<String>,
    #[serde(alias = "name", alias = "pat_name", deserialize_with = "de::opt_string_or_number")]
    pub patient_name: Option<String>,
    #[serde(alias = "queue_number", deserialize_with = "de::opt_string_or_number")]
    pub queue_no: Option<String>,
    /// Local hint of how many times this patient was called. The
    /// authoritative count comes from refresh.
    #[serde(skip_deserializing)]
    pub call_count: u32,
}

impl ActiveVisit {
    pub fn from_entry(entry: &PatientQueueEntry) -> Self {
        Self {
            appointment_id: entry.appointment_id.clone(),
            patient_id: Some(entry.id.clone()).filter(|id| !id.is_empty()),
            patient_name: Some(entry.patient_name.clone()).filter(|n| !n.is_empty()),
            queue_no: entry.queue_no.clone(),
            call_count: 1,
        }
    }

    pub fn from_receipt(receipt: &CallReceipt) -> Option<Self> {
        let appointment_id = receipt.appointment_id.clone()?;
        Some(Self {
            appointment_id,
            patient_id: receipt.patient_id.clone(),
            patient_name: receipt.patient_name.clone(),
            queue_no: receipt.queue_no.clone(),
            call_count: 1,
        })
    }

    /// Short human label: `#12 Chen Wei`.
    pub fn label(&self) -> String {
        let name = self.patient_name.as_deref().unwrap_or(&self.appointment_id);
        match &self.queue_no {
            Some(no) => format!("#{no} {name}"),
            None => name.to_owned(),
        }
    }
}

/// What the call endpoint hands back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallReceipt {
    #[serde(deserialize_with = "de::opt_string_or_number")]
    pub appointment_id: Option<String>,
    #[serde(deserialize_with = "de::opt_string_or_number")]
    pub patient_id: Option<String>,
    #[serde(alias = "name", alias = "pat_name", deserialize_with = "de::opt_string_or_number")]
    pub patient_name: Option<String>,
    #[serde(alias = "queue_number", deserialize_with = "de::opt_string_or_number")]
    pub queue_no: Option<String>,
    #[serde(deserialize_with = "de::opt_string_or_number")]
    pub room_name: Option<String>,
}

/// A doctor who can take over a moved appointment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassignTarget {
    #[serde(alias = "id", alias = "doctor_id", deserialize_with = "de::lenient_i64")]
    pub doc_id: i64,
    #[serde(
        alias = "name",
        alias = "nick_name",
        alias = "doctor_name",
        deserialize_with = "de::string_or_number"
    )]
    pub doc_name: String,
    #[serde(deserialize_with = "de::opt_lenient_i64")]
    pub room_id: Option<i64>,
    #[serde(deserialize_with = "de::opt_string_or_number")]
    pub room_name: Option<String>,
    #[serde(alias = "count", alias = "wait_count", alias = "untreated_count")]
    pub untreated: u32,
}

/// Transient "resolve the current visit first" prompt raised by
/// `handle_next`. Cleared by any terminal action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDialog {
    pub current: ActiveVisit,
    pub targets: Vec<ReassignTarget>,
}
