// ── Queue state store ──
//
// Watch-backed queue state with sequenced refreshes.

mod queue_store;

pub use queue_store::{QueueStateStore, QueueView, RefreshTicket, TerminalAction};
