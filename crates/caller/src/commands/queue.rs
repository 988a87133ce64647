//! Queue listing.

use std::sync::Arc;

use tabled::Tabled;

use caller_core::{DoctorStatus, PatientQueueEntry, QueueCommand, QueueMeta, QueueTab};

use crate::cli::{GlobalOpts, OutputFormat, QueueArgs};
use crate::error::CliError;
use crate::output;

use super::{Station, util};

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
pub struct QueueRow {
    #[tabled(rename = "No")]
    queue_no: String,
    #[tabled(rename = "Appointment")]
    appointment: String,
    #[tabled(rename = "Patient")]
    patient: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Registered")]
    registered: String,
}

impl QueueRow {
    pub fn new(entry: &PatientQueueEntry, color: bool) -> Self {
        Self {
            queue_no: entry.queue_no.clone().unwrap_or_default(),
            appointment: entry.appointment_id.clone(),
            patient: entry.patient_name.clone(),
            state: output::paint_patient_state(entry.state, color),
            age: entry.age.map(|a| a.to_string()).unwrap_or_default(),
            registered: entry.register_time.clone().unwrap_or_default(),
        }
    }
}

/// Render queue rows in the chosen format.
pub fn render_entries(entries: &[Arc<PatientQueueEntry>], global: &GlobalOpts) -> String {
    let color = output::should_color(&global.color);
    output::render_list(
        &global.output,
        entries,
        |e| QueueRow::new(e, color),
        |e| e.appointment_id.clone(),
    )
}

/// One-line summary of the list counters.
pub fn meta_line(tab: QueueTab, meta: &QueueMeta) -> String {
    format!(
        "{tab}: waiting {} · passed {} · ended {} · called {}",
        meta.wait_count, meta.pass_count, meta.end_count, meta.call_count
    )
}

/// One-line summary of the pushed doctor counters.
pub fn status_line(status: &DoctorStatus, color: bool) -> String {
    format!(
        "doctor {} [{}]: waiting {} · passed {} · ended {} · called {}",
        status.doc,
        output::paint_doctor_state(status.status, color),
        status.wait_count,
        status.pass_count,
        status.end_count,
        status.call_count
    )
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(station: &Station, args: QueueArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let tab = util::queue_tab(args.tab);
    let store = station.gateway().store();
    store.set_active_tab(tab);
    store.set_page(args.page);
    station.session.execute(QueueCommand::Refresh).await?;

    let entries = store.entries();
    output::print_output(&render_entries(&entries, global), global.quiet);
    if !global.quiet && matches!(global.output, OutputFormat::Table) {
        eprintln!("{}", meta_line(tab, &store.view().meta));
    }
    Ok(())
}
