// caller-core: session, broker synchronization and queue state for the
// calling station, between caller-api and the CLI.

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod heartbeat;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod store;
pub mod stream;
pub mod topics;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{ActionOutcome, AssignChoice, CommandResult, NextStep, QueueCommand};
pub use config::SessionConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use error::CoreError;
pub use gateway::ActionGateway;
pub use heartbeat::{Beacon, HeartbeatScheduler};
pub use registry::{DispatchReport, Handler, Message, SubscriptionRegistry, handler};
pub use session::{Session, SubscriptionHandle};
pub use store::{QueueStateStore, QueueView, TerminalAction};
pub use stream::{QueueSnapshot, StateStream};
pub use topics::TopicFilter;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    ActiveVisit, CallReceipt, DoctorState, DoctorStatus, ListPage, Org, PatientQueueEntry,
    PatientState, PendingDialog, QueueMeta, QueuePage, QueueTab, ReassignTarget, Room,
    SessionContext, StatusDelta, User,
};
