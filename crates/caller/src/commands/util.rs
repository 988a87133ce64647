//! Shared helpers for command handlers.

use std::io::IsTerminal;

use caller_core::{ActionOutcome, CommandResult, NextStep, QueueCommand, QueueTab};

use crate::cli::{GlobalOpts, TabArg};
use crate::error::CliError;

use super::Station;

pub fn queue_tab(tab: TabArg) -> QueueTab {
    match tab {
        TabArg::Waiting => QueueTab::Waiting,
        TabArg::Pass => QueueTab::Pass,
        TabArg::End => QueueTab::End,
    }
}

/// Load the consultation in progress and the waiting list, so local
/// refusals match what the backend knows.
pub async fn prime(station: &Station) -> Result<(), CliError> {
    station
        .session
        .execute(QueueCommand::RestoreActiveVisit)
        .await?;
    station.session.execute(QueueCommand::Refresh).await?;
    Ok(())
}

/// Execute an action command and report its outcome.
pub async fn run_action(
    station: &Station,
    action: &str,
    cmd: QueueCommand,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let outcome = match station.session.execute(cmd).await? {
        CommandResult::Outcome(outcome) | CommandResult::Next(NextStep::Called(outcome)) => outcome,
        other => {
            return Err(CliError::ApiError {
                message: format!("unexpected command result: {other:?}"),
            });
        }
    };
    settle(action, outcome, global)
}

/// Report an action outcome: a note on success, `Refused` otherwise.
pub fn settle(action: &str, outcome: ActionOutcome, global: &GlobalOpts) -> Result<(), CliError> {
    if outcome.success {
        if !global.quiet {
            eprintln!("{action}: done");
        }
        return Ok(());
    }
    Err(CliError::Refused {
        action: action.into(),
        message: outcome
            .message
            .unwrap_or_else(|| "rejected by backend".into()),
    })
}

/// Whether interactive prompts can be shown.
pub fn interactive() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}

/// Map a dialoguer / interactive I/O failure into CliError.
pub fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !interactive() {
        return Err(CliError::Validation {
            field: "confirmation".into(),
            reason: format!("{message} (pass --yes in non-interactive use)"),
        });
    }
    dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(prompt_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tab_args_map_to_queue_tabs() {
        assert_eq!(queue_tab(TabArg::Waiting), QueueTab::Waiting);
        assert_eq!(queue_tab(TabArg::Pass).pat_type(), 1);
        assert_eq!(queue_tab(TabArg::End), QueueTab::End);
    }
}
