//! Config subcommand handlers.

use std::path::Path;

use dialoguer::Input;

use caller_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

use super::util::{self, prompt_err};

// ── Helpers ─────────────────────────────────────────────────────────

fn read_table(path: &Path) -> Result<toml::Table, CliError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => raw.parse().map_err(|e| CliError::Config {
            message: format!("failed to parse {}: {e}", path.display()),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(toml::Table::new()),
        Err(e) => Err(e.into()),
    }
}

/// Best-effort typing for `config set` values.
fn parse_value(raw: &str) -> toml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return toml::Value::Integer(n);
    }
    toml::Value::String(raw.to_owned())
}

/// Set `key` (dot-separated) in `table`, creating intermediate tables.
fn set_path(table: &mut toml::Table, key: &str, value: toml::Value) -> Result<(), CliError> {
    let mut parts: Vec<&str> = key.split('.').collect();
    let Some(leaf) = parts.pop().filter(|l| !l.is_empty()) else {
        return Err(CliError::Validation {
            field: "key".into(),
            reason: format!("empty key: {key:?}"),
        });
    };

    let mut cursor = table;
    for part in parts {
        let entry = cursor
            .entry(part.to_owned())
            .or_insert(toml::Value::Table(toml::Table::new()));
        cursor = entry.as_table_mut().ok_or_else(|| CliError::Validation {
            field: "key".into(),
            reason: format!("{part} is not a table"),
        })?;
    }
    cursor.insert(leaf.to_owned(), value);
    Ok(())
}

fn redacted(mut cfg: Config) -> Config {
    if cfg.backend.token.is_some() {
        cfg.backend.token = Some("********".into());
    }
    cfg
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config::config_file(global);

    match args.command {
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = redacted(config::resolve(global)?);
            let out = output::render_single(
                &global.output,
                &cfg,
                |c| toml::to_string_pretty(c).unwrap_or_default(),
                |c| c.backend.url.clone(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Set { key, value } => {
            let mut table = read_table(&path)?;
            set_path(&mut table, &key, parse_value(&value))?;

            // Reject edits the loader could not read back.
            toml::Value::Table(table.clone())
                .try_into::<Config>()
                .map_err(|e| CliError::Validation {
                    field: key.clone(),
                    reason: e.to_string(),
                })?;

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let raw = toml::to_string_pretty(&table).map_err(|e| CliError::Config {
                message: e.to_string(),
            })?;
            std::fs::write(&path, raw)?;
            if !global.quiet {
                eprintln!("Set {key} in {}", path.display());
            }
            Ok(())
        }

        ConfigCommand::Init => init(&path, global),

        ConfigCommand::SetToken => {
            let cfg = config::load_file_config(global)?;
            let org = cfg.org()?;
            let token = rpassword::prompt_password("Backend token: ").map_err(prompt_err)?;
            if token.trim().is_empty() {
                return Err(CliError::Validation {
                    field: "token".into(),
                    reason: "token cannot be empty".into(),
                });
            }
            caller_config::store_token(&org.org_code, token.trim())?;
            if !global.quiet {
                eprintln!("Token stored in system keyring for {}", org.org_code);
            }
            Ok(())
        }

        ConfigCommand::ClearState => {
            caller_config::clear_mqtt_params_at(&caller_config::state_path())?;
            if !global.quiet {
                eprintln!("Remembered broker parameters cleared");
            }
            Ok(())
        }
    }
}

// ── Init: interactive wizard ────────────────────────────────────────

fn init(path: &Path, global: &GlobalOpts) -> Result<(), CliError> {
    if path.exists() && !util::confirm(&format!("Overwrite {}?", path.display()), global.yes)? {
        return Ok(());
    }
    if !util::interactive() {
        return Err(CliError::Validation {
            field: "interactive".into(),
            reason: "config init needs a terminal; use `caller config set` instead".into(),
        });
    }

    eprintln!("caller: configuration wizard");
    eprintln!("   Config path: {}\n", path.display());

    let mut cfg = Config::default();

    cfg.backend.url = Input::new()
        .with_prompt("Triage backend URL")
        .default("http://127.0.0.1:3000".into())
        .interact_text()
        .map_err(prompt_err)?;
    cfg.backend_url()?;

    cfg.broker.host = Input::new()
        .with_prompt("Broker host")
        .interact_text()
        .map_err(prompt_err)?;
    cfg.broker.ws_port = Input::new()
        .with_prompt("Broker WebSocket port")
        .default(cfg.broker.ws_port)
        .interact_text()
        .map_err(prompt_err)?;
    cfg.broker.use_tls = dialoguer::Confirm::new()
        .with_prompt("Use TLS (wss)?")
        .default(false)
        .interact()
        .map_err(prompt_err)?;

    cfg.station.org_code = Input::new()
        .with_prompt("Organization code")
        .interact_text()
        .map_err(prompt_err)?;
    cfg.station.org_id = Input::new()
        .with_prompt("Organization id")
        .interact_text()
        .map_err(prompt_err)?;
    cfg.station.org_name = Input::new()
        .with_prompt("Organization name")
        .allow_empty(true)
        .interact_text()
        .map_err(prompt_err)?;
    cfg.station.dept_id = Input::new()
        .with_prompt("Department id")
        .default(0)
        .interact_text()
        .map_err(prompt_err)?;
    cfg.station.doctor_id = Some(
        Input::new()
            .with_prompt("Doctor id")
            .interact_text()
            .map_err(prompt_err)?,
    );
    cfg.station.doctor_name = Input::new()
        .with_prompt("Doctor name")
        .allow_empty(true)
        .interact_text()
        .map_err(prompt_err)?;

    let token = rpassword::prompt_password("Backend token (empty to skip): ").map_err(prompt_err)?;
    if !token.trim().is_empty() {
        match caller_config::store_token(&cfg.station.org_code, token.trim()) {
            Ok(()) => eprintln!("   ✓ Token stored in system keyring"),
            Err(e) => {
                eprintln!("   ! Keyring unavailable ({e}), saving token to the config file");
                cfg.backend.token = Some(token.trim().to_owned());
            }
        }
    }

    caller_config::save_config_to(path, &cfg)?;
    eprintln!("\n   ✓ Config written to {}", path.display());
    Ok(())
}
