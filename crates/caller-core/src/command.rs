// ── Command API ──
//
// Every state-changing queue operation as a value. The CLI builds these
// from arguments; `ActionGateway::execute` routes them.

use crate::model::{ActiveVisit, ReassignTarget, QueueTab};

/// How the operator resolves the active visit before calling the next
/// patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignChoice {
    /// Move the current appointment to another doctor.
    Reassign { target_doc_id: i64 },
    /// Finish the current consultation.
    End,
}

/// All queue operations a station can issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueCommand {
    Refresh,
    SetTab(QueueTab),
    Call { appointment_id: Option<String> },
    Recall,
    Pass { appointment_id: String },
    End { appointment_id: String },
    Assign { target_doc_id: i64, appointment_id: String },
    Next,
    ConfirmAssign(AssignChoice),
    DoctorStart,
    DoctorStop,
    RestoreActiveVisit,
}

/// Result of an action that reached (or was refused before) the backend.
///
/// Business rejections and local refusals both land here with
/// `success == false`; transport failures are errors instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: Option<String>,
}

impl ActionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// What `handle_next` decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// No consultation was active; the next patient was called.
    Called(ActionOutcome),
    /// Nobody is waiting.
    QueueEmpty,
    /// A consultation is active; resolve it via `confirm_assign` first.
    ResolveCurrentVisit {
        current: ActiveVisit,
        targets: Vec<ReassignTarget>,
    },
}

/// Result of [`QueueCommand`] execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Outcome(ActionOutcome),
    Next(NextStep),
    Refreshed { applied: bool },
    ActiveVisit(Option<ActiveVisit>),
}
