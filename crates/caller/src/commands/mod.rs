//! Command dispatch: bridges CLI args -> station session -> output formatting.

pub mod config_cmd;
pub mod doctor;
pub mod queue;
pub mod util;
pub mod visit;
pub mod watch;

use std::sync::Arc;
use std::time::Duration;

use caller_api::{HttpBackend, MqttConnector, OrgHeaders, TransportConfig};
use caller_config::Config;
use caller_core::{ActionGateway, Session};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// A configured, not yet linked, calling station.
pub struct Station {
    pub session: Session,
    pub config: Config,
}

impl Station {
    /// Build the backend client and session from `cfg` and bind the org,
    /// doctor and room it names.
    pub fn open(cfg: Config) -> Result<Self, CliError> {
        let url = cfg.backend_url()?;
        let org = cfg.org()?;

        let transport = TransportConfig {
            timeout: Duration::from_secs(cfg.backend.timeout),
            ..TransportConfig::default()
        };
        let backend = HttpBackend::new(url, &transport)?;
        backend.set_token(caller_config::resolve_token(&cfg));
        backend.set_org(Some(OrgHeaders {
            org_id: org.org_id.to_string(),
            org_code: org.org_code.clone(),
            org_name: org.org_name.clone(),
        }));

        let session = Session::new(cfg.session_config(), Arc::new(MqttConnector), Arc::new(backend));
        session.set_org(org);
        if let Some(user) = cfg.user() {
            session.set_user(user);
        }
        if let Some(room) = cfg.room() {
            session.set_room(room);
        }

        Ok(Self {
            session,
            config: cfg,
        })
    }

    pub fn gateway(&self) -> &Arc<ActionGateway> {
        self.session.gateway()
    }
}

/// Dispatch a station-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, station: &Station, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(station, args, global).await,
        Command::Queue(args) => queue::handle(station, args, global).await,
        Command::Next => visit::next(station, global).await,
        Command::Resolve(args) => visit::resolve(station, args, global).await,
        Command::Call { appointment } => visit::call(station, appointment, global).await,
        Command::Recall => visit::recall(station, global).await,
        Command::Pass { appointment } => visit::pass(station, appointment, global).await,
        Command::End { appointment } => visit::end(station, appointment, global).await,
        Command::Assign { appointment, to } => visit::assign(station, appointment, to, global).await,
        Command::Targets => visit::targets(station, global).await,
        Command::Current => visit::current(station, global).await,
        Command::Start => doctor::start(station, global).await,
        Command::Stop => doctor::stop(station, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
