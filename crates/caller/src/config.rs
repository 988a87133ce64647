//! Resolves the station's configuration from the config file, environment
//! and global flags.

use std::path::PathBuf;

use caller_config::Config;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The config file this invocation reads: `--config`, else the platform
/// default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(caller_config::config_path)
}

/// Config file + environment, without flag overrides.
pub fn load_file_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(caller_config::load_config_from(&config_file(global))?)
}

/// Default tracing filter: the config's `log_level` when readable.
pub fn default_log_level(global: &GlobalOpts) -> String {
    load_file_config(global).map_or_else(|_| "warn".into(), |cfg| cfg.defaults.log_level)
}

/// Config file + environment + global flags. Fails when no backend is
/// known at all.
pub fn resolve(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = config_file(global);
    let mut cfg = caller_config::load_config_from(&path)?;
    apply_overrides(&mut cfg, global);

    if cfg.backend.url.is_empty() && !path.exists() {
        return Err(CliError::NoConfig {
            path: path.display().to_string(),
        });
    }
    Ok(cfg)
}

fn apply_overrides(cfg: &mut Config, global: &GlobalOpts) {
    if let Some(url) = &global.backend {
        cfg.backend.url.clone_from(url);
    }
    if let Some(token) = &global.token {
        cfg.backend.token = Some(token.clone());
    }
    if let Some(timeout) = global.timeout {
        cfg.backend.timeout = timeout;
    }
    if let Some(host) = &global.broker {
        cfg.broker.host.clone_from(host);
    }
    if let Some(port) = global.ws_port {
        cfg.broker.ws_port = port;
    }
    if global.tls {
        cfg.broker.use_tls = true;
    }
    if let Some(doctor) = global.doctor {
        cfg.station.doctor_id = Some(doctor);
    }
}
