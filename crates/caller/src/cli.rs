//! Clap derive structures for the `caller` CLI.
//!
//! Defines the command tree, global flags, and shared types. Kept free of
//! workspace crates so `build.rs` can render man pages from it.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// caller -- calling station for clinic patient queues
#[derive(Debug, Parser)]
#[command(
    name = "caller",
    version,
    about = "Call patients from the clinic queue",
    long_about = "A calling station for doctors working a clinic patient queue.\n\n\
        Lists and calls patients through the triage backend and follows live\n\
        queue counters over the clinic's MQTT broker.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "CALLER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Triage backend URL (overrides config)
    #[arg(long, short = 'b', env = "CALLER_BACKEND_URL", global = true)]
    pub backend: Option<String>,

    /// Backend session token
    #[arg(long, env = "CALLER_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Broker host (overrides config)
    #[arg(long, env = "CALLER_BROKER_HOST", global = true)]
    pub broker: Option<String>,

    /// Broker WebSocket port (overrides config)
    #[arg(long, env = "CALLER_WS_PORT", global = true)]
    pub ws_port: Option<u16>,

    /// Connect to the broker over TLS (wss)
    #[arg(long, global = true)]
    pub tls: bool,

    /// Doctor id to act as (overrides config)
    #[arg(long, short = 'd', env = "CALLER_DOCTOR_ID", global = true)]
    pub doctor: Option<i64>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "CALLER_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Backend request timeout in seconds (overrides config)
    #[arg(long, env = "CALLER_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

/// Queue tab to list.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum TabArg {
    /// Waiting, priority, revisit and calling patients
    #[default]
    Waiting,
    /// Passed patients
    Pass,
    /// Finished consultations
    End,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Link to the broker and follow the queue live
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// List one tab of the queue
    #[command(alias = "ls", alias = "q")]
    Queue(QueueArgs),

    /// Call the next waiting patient
    #[command(alias = "n")]
    Next,

    /// Resolve the current consultation before calling the next patient
    Resolve(ResolveArgs),

    /// Call a specific patient, or the first waiting one
    Call {
        /// Appointment id (defaults to the first waiting patient)
        appointment: Option<String>,
    },

    /// Announce the current patient again
    Recall,

    /// Mark a patient as passed (did not show up)
    Pass {
        /// Appointment id
        appointment: String,
    },

    /// Finish a consultation
    End {
        /// Appointment id
        appointment: String,
    },

    /// Move an appointment to another doctor
    Assign {
        /// Appointment id
        appointment: String,

        /// Doctor id taking over
        #[arg(long)]
        to: i64,
    },

    /// List doctors who can take over an appointment
    Targets,

    /// Show the consultation in progress
    #[command(alias = "cur")]
    Current,

    /// Open the doctor for calls
    Start,

    /// Stop taking calls
    Stop,

    /// Manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  QUEUE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct QueueArgs {
    /// Tab to list
    #[arg(long, short = 't', value_enum, default_value = "waiting")]
    pub tab: TabArg,

    /// Page number (1-based)
    #[arg(long, default_value = "1")]
    pub page: u32,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Tab to follow
    #[arg(long, short = 't', value_enum, default_value = "waiting")]
    pub tab: TabArg,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    #[command(subcommand)]
    pub command: ResolveCommand,
}

#[derive(Debug, Subcommand)]
pub enum ResolveCommand {
    /// Finish the current consultation
    End,

    /// Hand the current appointment to another doctor
    Reassign {
        /// Doctor id taking over
        #[arg(long)]
        to: i64,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current resolved configuration
    Show,

    /// Print the config file path
    Path,

    /// Set a configuration value
    Set {
        /// Config key (dot-separated path, e.g., "broker.host")
        key: String,

        /// Value to set
        value: String,
    },

    /// Store the backend token in the system keyring
    SetToken,

    /// Forget the remembered broker parameters
    ClearState,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
