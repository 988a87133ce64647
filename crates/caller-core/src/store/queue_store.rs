// ── Queue state store ──
//
// Single owner of the station's view: queue rows for the active tab, the
// doctor's counters, the active consultation and transient UI intents.
// Every field lives behind a `watch` channel so consumers can observe
// changes.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::{debug, trace};

use crate::model::{
    ActiveVisit, CallReceipt, DoctorState, DoctorStatus, ListPage, PatientQueueEntry,
    PendingDialog, QueueMeta, QueuePage, QueueTab, StatusDelta,
};
use crate::stream::{QueueSnapshot, StateStream};

/// Non-row state of the queue screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueView {
    pub active_tab: QueueTab,
    pub page: QueuePage,
    pub meta: QueueMeta,
    pub pending_dialog: Option<PendingDialog>,
    /// Row the operator has selected. Purely presentational.
    pub selected: Option<Arc<PatientQueueEntry>>,
    pub last_call: Option<CallReceipt>,
    pub loading: bool,
}

/// Local terminal actions that nudge counters before the next push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalAction {
    Pass,
    End,
    Reassign,
}

/// Issued by [`QueueStateStore::begin_refresh`]; carries the sequence
/// number and tab the response must be applied under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket {
    pub seq: u64,
    pub tab: QueueTab,
    pub page_num: u32,
    pub page_size: u32,
}

#[derive(Debug, Default)]
struct RefreshLedger {
    issued: u64,
    applied: u64,
}

pub struct QueueStateStore {
    entries: watch::Sender<QueueSnapshot>,
    status: watch::Sender<DoctorStatus>,
    active_visit: watch::Sender<Option<ActiveVisit>>,
    view: watch::Sender<QueueView>,
    ledger: Mutex<RefreshLedger>,
}

impl Default for QueueStateStore {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_PAGE_SIZE)
    }
}

impl QueueStateStore {
    pub fn new(page_size: u32) -> Self {
        let (entries, _) = watch::channel(Arc::new(Vec::new()));
        let (status, _) = watch::channel(DoctorStatus::default());
        let (active_visit, _) = watch::channel(None);
        let (view, _) = watch::channel(QueueView {
            page: QueuePage {
                page_size,
                ..QueuePage::default()
            },
            ..QueueView::default()
        });

        Self {
            entries,
            status,
            active_visit,
            view,
            ledger: Mutex::new(RefreshLedger::default()),
        }
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn entries(&self) -> QueueSnapshot {
        self.entries.borrow().clone()
    }

    pub fn status(&self) -> DoctorStatus {
        self.status.borrow().clone()
    }

    pub fn active_visit(&self) -> Option<ActiveVisit> {
        self.active_visit.borrow().clone()
    }

    pub fn has_active_visit(&self) -> bool {
        self.active_visit.borrow().is_some()
    }

    pub fn view(&self) -> QueueView {
        self.view.borrow().clone()
    }

    pub fn active_tab(&self) -> QueueTab {
        self.view.borrow().active_tab
    }

    pub fn pending_dialog(&self) -> Option<PendingDialog> {
        self.view.borrow().pending_dialog.clone()
    }

    pub fn entry_by_appointment(&self, appointment_id: &str) -> Option<Arc<PatientQueueEntry>> {
        self.entries
            .borrow()
            .iter()
            .find(|e| e.appointment_id == appointment_id)
            .cloned()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe_entries(&self) -> StateStream<QueueSnapshot> {
        StateStream::new(self.entries.subscribe())
    }

    pub fn subscribe_status(&self) -> StateStream<DoctorStatus> {
        StateStream::new(self.status.subscribe())
    }

    pub fn subscribe_active_visit(&self) -> StateStream<Option<ActiveVisit>> {
        StateStream::new(self.active_visit.subscribe())
    }

    pub fn subscribe_view(&self) -> StateStream<QueueView> {
        StateStream::new(self.view.subscribe())
    }

    // ── Refresh sequencing ───────────────────────────────────────────

    /// Reserve the next refresh sequence number for the active tab.
    pub fn begin_refresh(&self) -> RefreshTicket {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        ledger.issued += 1;

        let mut ticket = RefreshTicket {
            seq: ledger.issued,
            tab: QueueTab::default(),
            page_num: 1,
            page_size: 0,
        };
        self.view.send_modify(|v| {
            v.loading = true;
            ticket.tab = v.active_tab;
            ticket.page_num = v.page.page_num;
            ticket.page_size = v.page.page_size;
        });
        ticket
    }

    /// Apply a list response.
    ///
    /// Discarded when a later-issued refresh already landed, or when the
    /// tab changed since the ticket was issued. Rows outside the ticket's
    /// tab are dropped. Returns whether the page was applied.
    pub fn apply_refresh(&self, ticket: RefreshTicket, page: ListPage) -> bool {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);

        if ticket.seq <= ledger.applied {
            debug!(seq = ticket.seq, applied = ledger.applied, "discarding stale refresh");
            return false;
        }
        if ticket.tab != self.active_tab() {
            debug!(seq = ticket.seq, tab = %ticket.tab, "discarding refresh for inactive tab");
            return false;
        }
        ledger.applied = ticket.seq;

        let received = page.list.len();
        let rows: Vec<Arc<PatientQueueEntry>> = page
            .list
            .into_iter()
            .filter(|e| ticket.tab.accepts(e.state))
            .map(Arc::new)
            .collect();
        if rows.len() != received {
            debug!(
                tab = %ticket.tab,
                dropped = received - rows.len(),
                "dropped rows outside tab"
            );
        }

        let rows = Arc::new(rows);
        self.entries.send_replace(Arc::clone(&rows));
        self.view.send_modify(|v| {
            v.page.total = page.total;
            v.meta = page.meta;
            v.loading = ledger.issued > ledger.applied;
            v.selected = v.selected.take().and_then(|sel| {
                rows.iter()
                    .find(|e| e.appointment_id == sel.appointment_id)
                    .cloned()
            });
        });

        trace!(seq = ticket.seq, rows = rows.len(), "refresh applied");
        true
    }

    /// A refresh failed; keep the rows, clear the loading flag if nothing
    /// else is in flight.
    pub fn fail_refresh(&self, ticket: RefreshTicket) {
        let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        if ticket.seq >= ledger.issued {
            self.view.send_modify(|v| v.loading = false);
        }
    }

    // ── Tab & selection ──────────────────────────────────────────────

    /// Switch tabs. Rows are cleared until the next refresh lands so a
    /// stale tab's rows are never shown under the new tab. Returns whether
    /// the tab changed.
    pub fn set_active_tab(&self, tab: QueueTab) -> bool {
        let changed = self.view.send_if_modified(|v| {
            if v.active_tab == tab {
                return false;
            }
            v.active_tab = tab;
            v.page.page_num = 1;
            v.page.total = 0;
            v.selected = None;
            true
        });
        if changed {
            self.entries.send_replace(Arc::new(Vec::new()));
        }
        changed
    }

    pub fn set_page(&self, page_num: u32) {
        self.view.send_modify(|v| v.page.page_num = page_num.max(1));
    }

    pub fn set_current_patient(&self, entry: Option<Arc<PatientQueueEntry>>) {
        self.view.send_modify(|v| v.selected = entry);
    }

    // ── Active visit ─────────────────────────────────────────────────

    pub fn set_active_visit(&self, visit: Option<ActiveVisit>) {
        self.active_visit.send_replace(visit);
    }

    /// Clear the active visit if it is `appointment_id`. Returns whether
    /// it was cleared.
    pub fn clear_active_visit_if(&self, appointment_id: &str) -> bool {
        self.active_visit.send_if_modified(|current| {
            if current
                .as_ref()
                .is_some_and(|v| v.appointment_id == appointment_id)
            {
                *current = None;
                true
            } else {
                false
            }
        })
    }

    /// Bump the local call-count hint on the active visit.
    pub fn bump_call_count(&self) -> Option<u32> {
        let mut count = None;
        self.active_visit.send_if_modified(|current| {
            if let Some(v) = current {
                v.call_count = v.call_count.saturating_add(1);
                count = Some(v.call_count);
                true
            } else {
                false
            }
        });
        count
    }

    pub fn set_last_call(&self, receipt: CallReceipt) {
        self.view.send_modify(|v| v.last_call = Some(receipt));
    }

    pub fn set_pending_dialog(&self, dialog: Option<PendingDialog>) {
        self.view.send_modify(|v| v.pending_dialog = dialog);
    }

    // ── Counters ─────────────────────────────────────────────────────

    /// Apply a broker-pushed delta for `bound_doctor`. Deltas for any other
    /// doctor are ignored. Returns whether anything changed.
    pub fn apply_status_delta(&self, delta: &StatusDelta, bound_doctor: i64) -> bool {
        if delta.doc != Some(bound_doctor) {
            return false;
        }
        self.status.send_if_modified(|s| {
            s.doc = bound_doctor;
            delta.apply_to(s)
        })
    }

    /// Optimistic counter nudge after a local terminal action.
    pub fn record_terminal(&self, action: TerminalAction) {
        self.status.send_modify(|s| match action {
            TerminalAction::Pass => s.pass_count = s.pass_count.saturating_add(1),
            TerminalAction::End => s.end_count = s.end_count.saturating_add(1),
            TerminalAction::Reassign => {}
        });
        // Any terminal action resolves the pending prompt.
        self.set_pending_dialog(None);
    }

    pub fn set_doctor_state(&self, state: DoctorState) {
        self.status.send_if_modified(|s| {
            let changed = s.status != state;
            s.status = state;
            changed
        });
    }

    pub fn bind_doctor(&self, doc_id: i64) {
        self.status.send_if_modified(|s| {
            let changed = s.doc != doc_id;
            s.doc = doc_id;
            changed
        });
    }

    // ── Teardown ─────────────────────────────────────────────────────

    /// Reset to a blank station. In-flight refreshes are invalidated.
    pub fn clear(&self) {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        ledger.issued += 1;
        ledger.applied = ledger.issued;

        let page_size = self.view.borrow().page.page_size;
        self.entries.send_replace(Arc::new(Vec::new()));
        self.status.send_replace(DoctorStatus::default());
        self.active_visit.send_replace(None);
        self.view.send_replace(QueueView {
            page: QueuePage {
                page_size,
                ..QueuePage::default()
            },
            ..QueueView::default()
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::PatientState;

    fn entry(appt: &str, state: PatientState) -> PatientQueueEntry {
        PatientQueueEntry {
            id: format!("p-{appt}"),
            appointment_id: appt.into(),
            patient_name: format!("Patient {appt}"),
            state,
            ..PatientQueueEntry::default()
        }
    }

    fn page(rows: Vec<PatientQueueEntry>) -> ListPage {
        ListPage {
            total: u64::try_from(rows.len()).unwrap(),
            list: rows,
            meta: QueueMeta::default(),
        }
    }

    fn appointments(store: &QueueStateStore) -> Vec<String> {
        store
            .entries()
            .iter()
            .map(|e| e.appointment_id.clone())
            .collect()
    }

    #[test]
    fn later_issued_refresh_wins_regardless_of_arrival() {
        let store = QueueStateStore::default();
        let first = store.begin_refresh();
        let second = store.begin_refresh();

        assert!(store.apply_refresh(second, page(vec![entry("B", PatientState::Waiting)])));
        assert!(!store.apply_refresh(first, page(vec![entry("A", PatientState::Waiting)])));

        assert_eq!(appointments(&store), vec!["B"]);
        assert!(!store.view().loading);
    }

    #[test]
    fn in_order_refreshes_both_apply() {
        let store = QueueStateStore::default();
        let first = store.begin_refresh();
        let second = store.begin_refresh();

        assert!(store.apply_refresh(first, page(vec![entry("A", PatientState::Waiting)])));
        assert!(store.view().loading);
        assert!(store.apply_refresh(second, page(vec![entry("B", PatientState::Waiting)])));
        assert_eq!(appointments(&store), vec!["B"]);
    }

    #[test]
    fn rows_outside_the_tab_are_dropped() {
        let store = QueueStateStore::default();
        store.set_active_tab(QueueTab::Pass);
        let ticket = store.begin_refresh();

        store.apply_refresh(
            ticket,
            page(vec![
                entry("A", PatientState::Passed),
                entry("B", PatientState::Waiting),
                entry("C", PatientState::Calling),
            ]),
        );

        assert_eq!(appointments(&store), vec!["A"]);
    }

    #[test]
    fn rows_with_unknown_state_survive_refresh() {
        let store = QueueStateStore::default();
        let ticket = store.begin_refresh();

        store.apply_refresh(
            ticket,
            page(vec![
                entry("A", PatientState::Waiting),
                entry("X", PatientState::Other(17)),
            ]),
        );

        assert_eq!(appointments(&store), vec!["A", "X"]);
    }

    #[test]
    fn refresh_for_previous_tab_is_discarded() {
        let store = QueueStateStore::default();
        let ticket = store.begin_refresh();
        store.set_active_tab(QueueTab::End);

        assert!(!store.apply_refresh(ticket, page(vec![entry("A", PatientState::Waiting)])));
        assert!(store.entries().is_empty());
    }

    #[test]
    fn status_delta_for_other_doctor_is_ignored() {
        let store = QueueStateStore::default();
        store.bind_doctor(7);
        let delta = StatusDelta {
            doc: Some(9),
            wait_count: Some(4),
            ..StatusDelta::default()
        };

        assert!(!store.apply_status_delta(&delta, 7));
        assert_eq!(store.status().wait_count, 0);
    }

    #[test]
    fn terminal_actions_nudge_counters_and_close_dialog() {
        let store = QueueStateStore::default();
        store.set_pending_dialog(Some(PendingDialog {
            current: ActiveVisit::default(),
            targets: Vec::new(),
        }));

        store.record_terminal(TerminalAction::Pass);
        store.record_terminal(TerminalAction::End);

        let status = store.status();
        assert_eq!(status.pass_count, 1);
        assert_eq!(status.end_count, 1);
        assert!(store.pending_dialog().is_none());
    }

    #[test]
    fn clear_active_visit_only_for_matching_appointment() {
        let store = QueueStateStore::default();
        store.set_active_visit(Some(ActiveVisit {
            appointment_id: "A100".into(),
            call_count: 1,
            ..ActiveVisit::default()
        }));

        assert!(!store.clear_active_visit_if("A200"));
        assert_eq!(store.bump_call_count(), Some(2));
        assert!(store.clear_active_visit_if("A100"));
        assert!(store.active_visit().is_none());
        assert_eq!(store.bump_call_count(), None);
    }

    #[test]
    fn clear_invalidates_in_flight_refresh() {
        let store = QueueStateStore::default();
        let ticket = store.begin_refresh();
        store.clear();

        assert!(!store.apply_refresh(ticket, page(vec![entry("A", PatientState::Waiting)])));
        assert_eq!(store.view().page.page_size, crate::config::DEFAULT_PAGE_SIZE);
    }
}
