//! Live station: link to the broker, keep the queue refreshed and print
//! every change until interrupted.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use caller_config::{Config, MqttParams};
use caller_core::{QueueCommand, QueueTab};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::queue::{meta_line, render_entries, status_line};
use super::{Station, util};

/// Where to reach the broker: the config, else the parameters remembered
/// from the last linked session of the same org.
fn broker_target(cfg: &Config) -> Result<(bool, String, u16), CliError> {
    if !cfg.broker.host.is_empty() {
        return Ok((cfg.broker.use_tls, cfg.broker.host.clone(), cfg.broker.ws_port));
    }
    match caller_config::load_mqtt_params() {
        Ok(Some(p)) if p.org_code == cfg.station.org_code && !p.host.is_empty() => {
            debug!(host = %p.host, "using remembered broker parameters");
            Ok((p.use_tls, p.host, p.ws_port))
        }
        Ok(_) => Err(CliError::NotBound {
            what: "broker.host".into(),
        }),
        Err(e) => {
            warn!(error = %e, "could not read remembered broker parameters");
            Err(CliError::NotBound {
                what: "broker.host".into(),
            })
        }
    }
}

fn spinner(message: &str, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(style);
    }
    bar.set_message(message.to_owned());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn print_rows(station: &Station, tab: QueueTab, global: &GlobalOpts) {
    let store = station.gateway().store();
    let stamp = chrono::Local::now().format("%H:%M:%S");
    if matches!(global.output, OutputFormat::Table) && !global.quiet {
        eprintln!("── {stamp} · {}", meta_line(tab, &store.view().meta));
    }
    output::print_output(&render_entries(&store.entries(), global), global.quiet);
}

pub async fn handle(station: &Station, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = &station.config;
    let org = cfg.org()?;
    let (use_tls, host, port) = broker_target(cfg)?;

    let bar = spinner(&format!("linking to {host}:{port}"), global.quiet);
    let linked = station
        .session
        .link_session(use_tls, &host, port, org, cfg.user())
        .await;
    bar.finish_and_clear();
    linked?;

    let mut params = MqttParams::from_config(cfg);
    params.host.clone_from(&host);
    params.ws_port = port;
    params.use_tls = use_tls;
    if let Err(e) = caller_config::save_mqtt_params(&params) {
        warn!(error = %e, "could not remember broker parameters");
    }

    let tab = util::queue_tab(args.tab);
    station
        .session
        .execute(QueueCommand::RestoreActiveVisit)
        .await?;
    station.session.execute(QueueCommand::SetTab(tab)).await?;
    print_rows(station, tab, global);

    let store = station.gateway().store();
    let color = output::should_color(&global.color);
    let mut entries = store.subscribe_entries();
    let mut status = store.subscribe_status();
    let mut visit = store.subscribe_active_visit();
    let mut link = station.session.subscribe_state();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted, unlinking");
                break;
            }
            Some(_) = entries.changed() => print_rows(station, tab, global),
            Some(s) = status.changed() => {
                if !global.quiet {
                    eprintln!("{}", status_line(&s, color));
                }
                // Counters moved: somebody acted on the queue.
                if let Err(e) = station.session.execute(QueueCommand::Refresh).await {
                    warn!(error = %e, "queue refresh failed");
                }
            }
            Some(v) = visit.changed() => {
                if !global.quiet {
                    match v {
                        Some(v) => eprintln!("in consultation: {}", v.label()),
                        None => eprintln!("no consultation in progress"),
                    }
                }
            }
            Ok(()) = link.changed() => {
                let state = *link.borrow_and_update();
                if !global.quiet {
                    eprintln!("broker {state}");
                }
            }
            else => break,
        }
    }

    station.session.disconnect();
    Ok(())
}
