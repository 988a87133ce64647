// ── Action gateway ──
//
// The only path for state-changing queue calls. Each action validates
// local invariants, issues the backend RPC, applies the local effect and
// then refreshes the list.
//
// Terminal actions may run concurrently; list consistency comes from the
// store's refresh sequencing. `call` is gated: it never runs while a
// consultation is active, and never overlaps another `call`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use caller_api::{Endpoint, RpcBackend};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::command::{ActionOutcome, AssignChoice, CommandResult, NextStep, QueueCommand};
use crate::error::CoreError;
use crate::model::{
    ActiveVisit, CallReceipt, DoctorState, ListPage, PendingDialog, QueueTab, ReassignTarget,
    SessionContext,
};
use crate::store::{QueueStateStore, TerminalAction};

/// `queue_type` for a doctor's own queue.
pub const QUEUE_TYPE_DOCTOR: u8 = 3;

enum Reply {
    Data(Value),
    Rejected(ActionOutcome),
}

/// Holds the single call slot; released on drop.
struct CallSlot<'a>(&'a AtomicBool);

impl<'a> CallSlot<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CallSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ActionGateway {
    backend: Arc<dyn RpcBackend>,
    store: Arc<QueueStateStore>,
    context: watch::Receiver<SessionContext>,
    call_in_flight: AtomicBool,
}

impl ActionGateway {
    pub fn new(
        backend: Arc<dyn RpcBackend>,
        store: Arc<QueueStateStore>,
        context: watch::Receiver<SessionContext>,
    ) -> Self {
        Self {
            backend,
            store,
            context,
            call_in_flight: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<QueueStateStore> {
        &self.store
    }

    fn doctor_id(&self) -> Result<i64, CoreError> {
        self.context
            .borrow()
            .doctor_id()
            .ok_or(CoreError::NotBound { what: "doctor" })
    }

    async fn send(&self, endpoint: Endpoint, payload: Value) -> Result<Reply, CoreError> {
        match self.backend.call(endpoint, payload).await {
            Ok(data) => Ok(Reply::Data(data)),
            Err(caller_api::Error::Backend { code, message }) => {
                warn!(%endpoint, code, %message, "backend rejected action");
                Ok(Reply::Rejected(ActionOutcome::rejected(message)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh_after(&self, action: &str) {
        if let Err(e) = self.refresh().await {
            warn!(action, error = %e, "refresh after action failed");
        }
    }

    // ── Queue reads ──────────────────────────────────────────────────

    /// Re-query the active tab. Returns whether the response was applied
    /// (a newer refresh may have superseded it).
    pub async fn refresh(&self) -> Result<bool, CoreError> {
        let doc_id = self.doctor_id()?;
        let ticket = self.store.begin_refresh();
        let payload = json!({
            "page_num": ticket.page_num,
            "page_size": ticket.page_size,
            "condition": {
                "doc_id": doc_id,
                "queue_type": QUEUE_TYPE_DOCTOR,
                "pat_type": ticket.tab.pat_type(),
            },
        });

        let page = match self.backend.call(Endpoint::ListQueue, payload).await {
            Ok(data) => decode::<ListPage>(data),
            Err(e) => Err(e.into()),
        };
        match page {
            Ok(page) => Ok(self.store.apply_refresh(ticket, page)),
            Err(e) => {
                self.store.fail_refresh(ticket);
                Err(e)
            }
        }
    }

    /// Switch tabs and re-query.
    pub async fn set_active_tab(&self, tab: QueueTab) -> Result<bool, CoreError> {
        if self.store.set_active_tab(tab) {
            debug!(%tab, "tab switched");
        }
        self.refresh().await
    }

    /// Ask the backend who is in consultation and adopt its answer.
    pub async fn restore_active_visit(&self) -> Result<Option<ActiveVisit>, CoreError> {
        let doc_id = self.doctor_id()?;
        let data = self
            .backend
            .call(Endpoint::ActiveVisit, json!({ "doc_id": doc_id }))
            .await?;

        let visit = if data.is_object() {
            decode::<ActiveVisit>(data)?
        } else {
            ActiveVisit::default()
        };
        let visit = Some(visit)
            .filter(|v| !v.appointment_id.is_empty())
            .map(|mut v| {
                v.call_count = v.call_count.max(1);
                v
            });

        if let Some(v) = &visit {
            info!(appointment = %v.appointment_id, "restored active visit");
        }
        self.store.set_active_visit(visit.clone());
        Ok(visit)
    }

    /// Doctors who can receive a moved appointment.
    pub async fn reassign_targets(&self) -> Result<Vec<ReassignTarget>, CoreError> {
        let (org_id, dept_id) = {
            let ctx = self.context.borrow();
            let org_id = ctx
                .org
                .as_ref()
                .map(|o| o.org_id)
                .ok_or(CoreError::NotBound { what: "org" })?;
            let dept_id = ctx.dept_id().ok_or(CoreError::NotBound { what: "department" })?;
            (org_id, dept_id)
        };

        let data = self
            .backend
            .call(
                Endpoint::ReassignTargets,
                json!({ "org_id": org_id, "dept_id": dept_id }),
            )
            .await?;

        let list = match data {
            Value::Null => return Ok(Vec::new()),
            Value::Object(mut obj) => obj.remove("list").unwrap_or(Value::Null),
            other => other,
        };
        if list.is_null() {
            return Ok(Vec::new());
        }
        decode(list)
    }

    // ── Actions ──────────────────────────────────────────────────────

    /// Call a patient: the given appointment, or the server's next.
    ///
    /// Refused while a consultation is active or another call is in flight.
    pub async fn call(&self, appointment_id: Option<&str>) -> Result<ActionOutcome, CoreError> {
        let doc_id = self.doctor_id()?;

        // Visit check under the slot, so a finishing call is always seen.
        let Some(slot) = CallSlot::acquire(&self.call_in_flight) else {
            return Ok(ActionOutcome::rejected("a call is already in progress"));
        };
        if let Some(active) = self.store.active_visit() {
            return Ok(ActionOutcome::rejected(format!(
                "{} is still in consultation; resolve the current visit first",
                active.label()
            )));
        }

        let mut payload = json!({ "doc_id": doc_id });
        if let Some(appt) = appointment_id {
            payload["appointment_id"] = json!(appt);
        }

        let outcome = match self.send(Endpoint::CallPatient, payload).await? {
            Reply::Rejected(outcome) => outcome,
            Reply::Data(data) => {
                let receipt = receipt_from(data);
                let visit = ActiveVisit::from_receipt(&receipt).or_else(|| {
                    appointment_id.map(|appt| {
                        self.store.entry_by_appointment(appt).map_or_else(
                            || ActiveVisit {
                                appointment_id: appt.to_owned(),
                                call_count: 1,
                                ..ActiveVisit::default()
                            },
                            |e| ActiveVisit::from_entry(&e),
                        )
                    })
                });
                self.store.set_last_call(receipt);

                match visit {
                    Some(v) => {
                        info!(appointment = %v.appointment_id, "patient called");
                        self.store.set_active_visit(Some(v));
                    }
                    None => {
                        if let Err(e) = self.restore_active_visit().await {
                            warn!(error = %e, "could not resolve called patient");
                        }
                    }
                }
                ActionOutcome::ok()
            }
        };
        drop(slot);

        self.refresh_after("call").await;
        Ok(outcome)
    }

    /// Call the active patient again.
    pub async fn recall(&self) -> Result<ActionOutcome, CoreError> {
        let doc_id = self.doctor_id()?;
        let Some(active) = self.store.active_visit() else {
            return Ok(ActionOutcome::rejected("no patient in consultation to recall"));
        };

        let payload = json!({ "appointment_id": active.appointment_id, "doc_id": doc_id });
        let outcome = match self.send(Endpoint::CallPatient, payload).await? {
            Reply::Rejected(outcome) => outcome,
            Reply::Data(data) => {
                self.store.set_last_call(receipt_from(data));
                let count = self.store.bump_call_count();
                debug!(appointment = %active.appointment_id, ?count, "patient recalled");
                ActionOutcome::ok()
            }
        };

        self.refresh_after("recall").await;
        Ok(outcome)
    }

    /// Mark an appointment as passed (no-show).
    pub async fn pass(&self, appointment_id: &str) -> Result<ActionOutcome, CoreError> {
        self.terminal(Endpoint::PassPatient, TerminalAction::Pass, appointment_id, None)
            .await
    }

    /// Finish an appointment's consultation.
    pub async fn end(&self, appointment_id: &str) -> Result<ActionOutcome, CoreError> {
        self.terminal(Endpoint::EndPatient, TerminalAction::End, appointment_id, None)
            .await
    }

    /// Move an appointment to `target_doc_id`'s queue.
    pub async fn assign(
        &self,
        target_doc_id: i64,
        appointment_id: &str,
    ) -> Result<ActionOutcome, CoreError> {
        if self.doctor_id()? == target_doc_id {
            return Ok(ActionOutcome::rejected(
                "cannot reassign a patient to the same doctor",
            ));
        }
        self.terminal(
            Endpoint::MovePatient,
            TerminalAction::Reassign,
            appointment_id,
            Some(target_doc_id),
        )
        .await
    }

    async fn terminal(
        &self,
        endpoint: Endpoint,
        action: TerminalAction,
        appointment_id: &str,
        target_doc_id: Option<i64>,
    ) -> Result<ActionOutcome, CoreError> {
        let doc_id = self.doctor_id()?;
        if appointment_id.is_empty() {
            return Ok(ActionOutcome::rejected("no appointment selected"));
        }

        let mut payload = json!({ "appointment_id": appointment_id, "doc_id": doc_id });
        if let Some(target) = target_doc_id {
            payload["target_doc_id"] = json!(target);
        }

        let outcome = match self.send(endpoint, payload).await? {
            Reply::Rejected(outcome) => outcome,
            Reply::Data(_) => {
                if self.store.clear_active_visit_if(appointment_id) {
                    debug!(appointment = %appointment_id, "active visit closed");
                }
                self.store.record_terminal(action);
                if self
                    .store
                    .view()
                    .selected
                    .is_some_and(|s| s.appointment_id == appointment_id)
                {
                    self.store.set_current_patient(None);
                }
                info!(%endpoint, appointment = %appointment_id, "action applied");
                ActionOutcome::ok()
            }
        };

        self.refresh_after(&endpoint.to_string()).await;
        Ok(outcome)
    }

    /// Decide between calling the head of the current list and resolving
    /// the current consultation first. An empty list calls nobody.
    pub async fn handle_next(&self) -> Result<NextStep, CoreError> {
        if let Some(current) = self.store.active_visit() {
            let targets = match self.reassign_targets().await {
                Ok(targets) => targets,
                Err(e) if e.is_business_fault() || matches!(e, CoreError::NotBound { .. }) => {
                    warn!(error = %e, "no reassignment targets");
                    Vec::new()
                }
                Err(e) => return Err(e),
            };
            self.store.set_pending_dialog(Some(PendingDialog {
                current: current.clone(),
                targets: targets.clone(),
            }));
            return Ok(NextStep::ResolveCurrentVisit { current, targets });
        }

        let Some(next) = self.store.entries().first().cloned() else {
            return Ok(NextStep::QueueEmpty);
        };

        let outcome = self.call(Some(&next.appointment_id)).await?;
        Ok(NextStep::Called(outcome))
    }

    /// Resolve the prompt raised by [`handle_next`](Self::handle_next).
    pub async fn confirm_assign(&self, choice: AssignChoice) -> Result<ActionOutcome, CoreError> {
        let current = self
            .store
            .pending_dialog()
            .map(|d| d.current)
            .or_else(|| self.store.active_visit());
        let Some(current) = current else {
            return Ok(ActionOutcome::rejected("no consultation to resolve"));
        };

        match choice {
            AssignChoice::Reassign { target_doc_id } => {
                self.assign(target_doc_id, &current.appointment_id).await
            }
            AssignChoice::End => self.end(&current.appointment_id).await,
        }
    }

    // ── Doctor state ─────────────────────────────────────────────────

    pub async fn doctor_start(&self) -> Result<ActionOutcome, CoreError> {
        self.toggle_doctor(Endpoint::DoctorStart, DoctorState::Started)
            .await
    }

    pub async fn doctor_stop(&self) -> Result<ActionOutcome, CoreError> {
        self.toggle_doctor(Endpoint::DoctorStop, DoctorState::Stopped)
            .await
    }

    async fn toggle_doctor(
        &self,
        endpoint: Endpoint,
        state: DoctorState,
    ) -> Result<ActionOutcome, CoreError> {
        match self.send(endpoint, json!({})).await? {
            Reply::Rejected(outcome) => Ok(outcome),
            Reply::Data(_) => {
                self.store.set_doctor_state(state);
                info!(%state, "doctor status changed");
                Ok(ActionOutcome::ok())
            }
        }
    }

    // ── Command routing ──────────────────────────────────────────────

    pub async fn execute(&self, cmd: QueueCommand) -> Result<CommandResult, CoreError> {
        let result = match cmd {
            QueueCommand::Refresh => CommandResult::Refreshed {
                applied: self.refresh().await?,
            },
            QueueCommand::SetTab(tab) => CommandResult::Refreshed {
                applied: self.set_active_tab(tab).await?,
            },
            QueueCommand::Call { appointment_id } => {
                CommandResult::Outcome(self.call(appointment_id.as_deref()).await?)
            }
            QueueCommand::Recall => CommandResult::Outcome(self.recall().await?),
            QueueCommand::Pass { appointment_id } => {
                CommandResult::Outcome(self.pass(&appointment_id).await?)
            }
            QueueCommand::End { appointment_id } => {
                CommandResult::Outcome(self.end(&appointment_id).await?)
            }
            QueueCommand::Assign {
                target_doc_id,
                appointment_id,
            } => CommandResult::Outcome(self.assign(target_doc_id, &appointment_id).await?),
            QueueCommand::Next => CommandResult::Next(self.handle_next().await?),
            QueueCommand::ConfirmAssign(choice) => {
                CommandResult::Outcome(self.confirm_assign(choice).await?)
            }
            QueueCommand::DoctorStart => CommandResult::Outcome(self.doctor_start().await?),
            QueueCommand::DoctorStop => CommandResult::Outcome(self.doctor_stop().await?),
            QueueCommand::RestoreActiveVisit => {
                CommandResult::ActiveVisit(self.restore_active_visit().await?)
            }
        };
        Ok(result)
    }
}

fn decode<T: DeserializeOwned + Default>(data: Value) -> Result<T, CoreError> {
    if data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(data)
        .map_err(|e| CoreError::Internal(format!("unexpected backend payload: {e}")))
}

fn receipt_from(data: Value) -> CallReceipt {
    if !data.is_object() {
        return CallReceipt::default();
    }
    serde_json::from_value(data).unwrap_or_else(|e| {
        warn!(error = %e, "unreadable call receipt");
        CallReceipt::default()
    })
}
