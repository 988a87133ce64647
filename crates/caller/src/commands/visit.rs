//! Consultation handlers: calling, recalling and resolving patients.

use tabled::Tabled;

use caller_core::{
    ActiveVisit, AssignChoice, CommandResult, NextStep, QueueCommand, ReassignTarget,
};

use crate::cli::{GlobalOpts, ResolveArgs, ResolveCommand};
use crate::error::CliError;
use crate::output;

use super::{Station, util};

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct TargetRow {
    #[tabled(rename = "Doctor")]
    doc_id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Room")]
    room: String,
    #[tabled(rename = "Untreated")]
    untreated: u32,
}

impl From<&ReassignTarget> for TargetRow {
    fn from(t: &ReassignTarget) -> Self {
        Self {
            doc_id: t.doc_id,
            name: t.doc_name.clone(),
            room: t.room_name.clone().unwrap_or_default(),
            untreated: t.untreated,
        }
    }
}

fn render_targets(targets: &[ReassignTarget], global: &GlobalOpts) -> String {
    output::render_list(
        &global.output,
        targets,
        |t| TargetRow::from(t),
        |t| t.doc_id.to_string(),
    )
}

fn visit_detail(visit: &ActiveVisit) -> String {
    output::detail_lines(&[
        ("Patient", visit.label()),
        ("Appointment", visit.appointment_id.clone()),
        ("Patient ID", visit.patient_id.clone().unwrap_or_default()),
        ("Calls", visit.call_count.to_string()),
    ])
}

fn render_visit(visit: &ActiveVisit, global: &GlobalOpts) -> String {
    output::render_single(&global.output, visit, visit_detail, |v| {
        v.appointment_id.clone()
    })
}

/// After a successful call, show who is now in consultation.
fn show_called(station: &Station, global: &GlobalOpts) {
    if let Some(visit) = station.gateway().store().active_visit() {
        output::print_output(&render_visit(&visit, global), global.quiet);
    }
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn next(station: &Station, global: &GlobalOpts) -> Result<(), CliError> {
    util::prime(station).await?;

    match station.gateway().handle_next().await? {
        NextStep::Called(outcome) => {
            util::settle("call", outcome, global)?;
            show_called(station, global);
            Ok(())
        }
        NextStep::QueueEmpty => {
            if !global.quiet {
                eprintln!("Nobody is waiting");
            }
            Ok(())
        }
        NextStep::ResolveCurrentVisit { current, targets } => {
            if !global.quiet {
                eprintln!("{} is still in consultation", current.label());
            }
            if util::interactive() && !global.yes {
                return resolve_interactively(station, &current, &targets, global).await;
            }
            output::print_output(&render_targets(&targets, global), global.quiet);
            if !global.quiet {
                eprintln!("Resolve it with: caller resolve end | caller resolve reassign --to <DOCTOR>");
            }
            Ok(())
        }
    }
}

async fn resolve_interactively(
    station: &Station,
    current: &ActiveVisit,
    targets: &[ReassignTarget],
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut items = vec![format!("End consultation with {}", current.label())];
    items.extend(targets.iter().map(|t| {
        format!(
            "Reassign to {} ({} untreated{})",
            t.doc_name,
            t.untreated,
            t.room_name
                .as_deref()
                .map(|r| format!(", {r}"))
                .unwrap_or_default()
        )
    }));
    items.push("Cancel".into());

    let selection = dialoguer::Select::new()
        .with_prompt("Resolve the current consultation")
        .items(&items)
        .default(0)
        .interact()
        .map_err(util::prompt_err)?;

    let choice = match selection {
        0 => AssignChoice::End,
        n => match targets.get(n - 1) {
            Some(target) => AssignChoice::Reassign {
                target_doc_id: target.doc_id,
            },
            None => return Ok(()),
        },
    };
    util::run_action(station, "resolve", QueueCommand::ConfirmAssign(choice), global).await?;
    next_after_resolve(station, global).await
}

/// From the `next` prompt, resolving is followed by the call that was asked for.
async fn next_after_resolve(station: &Station, global: &GlobalOpts) -> Result<(), CliError> {
    match station.gateway().handle_next().await? {
        NextStep::Called(outcome) => {
            util::settle("call", outcome, global)?;
            show_called(station, global);
        }
        NextStep::QueueEmpty => {
            if !global.quiet {
                eprintln!("Nobody is waiting");
            }
        }
        NextStep::ResolveCurrentVisit { current, .. } => {
            return Err(CliError::Refused {
                action: "call".into(),
                message: format!("{} is still in consultation", current.label()),
            });
        }
    }
    Ok(())
}

pub async fn resolve(station: &Station, args: ResolveArgs, global: &GlobalOpts) -> Result<(), CliError> {
    util::prime(station).await?;

    let choice = match args.command {
        ResolveCommand::End => AssignChoice::End,
        ResolveCommand::Reassign { to } => AssignChoice::Reassign { target_doc_id: to },
    };
    util::run_action(station, "resolve", QueueCommand::ConfirmAssign(choice), global).await
}

pub async fn call(
    station: &Station,
    appointment_id: Option<String>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    util::prime(station).await?;
    util::run_action(station, "call", QueueCommand::Call { appointment_id }, global).await?;
    show_called(station, global);
    Ok(())
}

pub async fn recall(station: &Station, global: &GlobalOpts) -> Result<(), CliError> {
    station
        .session
        .execute(QueueCommand::RestoreActiveVisit)
        .await?;
    util::run_action(station, "recall", QueueCommand::Recall, global).await
}

pub async fn pass(station: &Station, appointment_id: String, global: &GlobalOpts) -> Result<(), CliError> {
    util::run_action(station, "pass", QueueCommand::Pass { appointment_id }, global).await
}

pub async fn end(station: &Station, appointment_id: String, global: &GlobalOpts) -> Result<(), CliError> {
    util::run_action(station, "end", QueueCommand::End { appointment_id }, global).await
}

pub async fn assign(
    station: &Station,
    appointment_id: String,
    target_doc_id: i64,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    util::run_action(
        station,
        "assign",
        QueueCommand::Assign {
            target_doc_id,
            appointment_id,
        },
        global,
    )
    .await
}

pub async fn targets(station: &Station, global: &GlobalOpts) -> Result<(), CliError> {
    let targets = station.gateway().reassign_targets().await?;
    output::print_output(&render_targets(&targets, global), global.quiet);
    Ok(())
}

pub async fn current(station: &Station, global: &GlobalOpts) -> Result<(), CliError> {
    match station.session.execute(QueueCommand::RestoreActiveVisit).await? {
        CommandResult::ActiveVisit(Some(visit)) => {
            output::print_output(&render_visit(&visit, global), global.quiet);
        }
        _ => {
            if !global.quiet {
                eprintln!("No consultation in progress");
            }
        }
    }
    Ok(())
}
