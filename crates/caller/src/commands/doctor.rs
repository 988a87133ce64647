//! Doctor availability handlers.

use caller_core::QueueCommand;

use crate::cli::GlobalOpts;
use crate::error::CliError;

use super::{Station, util};

pub async fn start(station: &Station, global: &GlobalOpts) -> Result<(), CliError> {
    util::run_action(station, "start", QueueCommand::DoctorStart, global).await
}

pub async fn stop(station: &Station, global: &GlobalOpts) -> Result<(), CliError> {
    util::prime(station).await?;
    let waiting = station.gateway().store().view().meta.wait_count;
    if waiting > 0
        && !util::confirm(
            &format!("{waiting} patients are still waiting. Stop taking calls?"),
            global.yes,
        )?
    {
        return Ok(());
    }
    util::run_action(station, "stop", QueueCommand::DoctorStop, global).await
}
