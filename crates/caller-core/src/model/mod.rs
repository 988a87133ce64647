// ── Domain model ──
//
// Canonical representations of everything the calling station tracks:
// who is bound, the queue rows, the doctor's counters and the active
// consultation. Wire quirks are absorbed at the serde boundary.

pub(crate) mod de;

pub mod context;
pub mod patient;
pub mod queue;
pub mod status;
pub mod visit;

// ── Re-exports ──────────────────────────────────────────────────────

pub use context::{Org, Room, SessionContext, User};
pub use patient::{PatientQueueEntry, PatientState};
pub use queue::{ListPage, QueueMeta, QueuePage, QueueTab};
pub use status::{DoctorState, DoctorStatus, StatusDelta};
pub use visit::{ActiveVisit, CallReceipt, PendingDialog, ReassignTarget};
