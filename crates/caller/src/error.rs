//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use caller_config::ConfigError;
use caller_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const REFUSED: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to {endpoint}")]
    #[diagnostic(
        code(caller::connection_failed),
        help(
            "Check that the broker and triage backend are reachable.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Broker is not connected")]
    #[diagnostic(
        code(caller::not_connected),
        help("Run: caller watch, to link the station to the broker")
    )]
    NotConnected,

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(caller::auth_failed),
        help(
            "The session token was refused or has expired.\n\
             Store a fresh one with: caller config set-token\n\
             Or set the CALLER_TOKEN environment variable."
        )
    )]
    AuthFailed { message: String },

    // ── Station binding ──────────────────────────────────────────────

    #[error("Station has no {what} configured")]
    #[diagnostic(
        code(caller::not_bound),
        help(
            "Bind the station with: caller config init\n\
             Or set it directly, e.g.: caller config set station.doctor_id 7"
        )
    )]
    NotBound { what: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(caller::no_config),
        help(
            "Create one with: caller config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(caller::config))]
    Config { message: String },

    // ── Queue actions ────────────────────────────────────────────────

    #[error("{action} refused: {message}")]
    #[diagnostic(code(caller::refused))]
    Refused { action: String, message: String },

    // ── API ──────────────────────────────────────────────────────────

    #[error("API error: {message}")]
    #[diagnostic(code(caller::api_error))]
    ApiError { message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(caller::validation))]
    Validation { field: String, reason: String },

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(caller::timeout),
        help("Increase timeout with --timeout or check backend responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(caller::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::NotConnected => exit_code::CONNECTION,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::Refused { .. } => exit_code::REFUSED,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NotBound { .. } | Self::NoConfig { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { endpoint, reason } => CliError::ConnectionFailed {
                endpoint: if endpoint.is_empty() {
                    "the broker".into()
                } else {
                    endpoint
                },
                reason,
            },

            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },

            CoreError::NotConnected => CliError::NotConnected,

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::NotBound { what } => CliError::NotBound { what: what.into() },

            CoreError::InvalidTopic { filter, reason } => CliError::Validation {
                field: format!("topic {filter}"),
                reason,
            },

            CoreError::Rejected { message, code } => CliError::ApiError {
                message: format!("{message} (code {code})"),
            },

            CoreError::MalformedMessage { topic, message } => CliError::ApiError {
                message: format!("malformed message on {topic}: {message}"),
            },

            CoreError::Api { message } | CoreError::Internal(message) => {
                CliError::ApiError { message }
            }
        }
    }
}

impl From<caller_api::Error> for CliError {
    fn from(err: caller_api::Error) -> Self {
        CoreError::from(err).into()
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Unbound { what } => CliError::NotBound { what: what.into() },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}
