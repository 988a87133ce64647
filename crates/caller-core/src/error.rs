// ── Core error types ──
//
// User-facing errors from caller-core. Consumers never see raw HTTP or
// broker client errors; the `From<caller_api::Error>` impl translates
// transport-layer failures into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to broker at {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Broker not connected")]
    NotConnected,

    #[error("Timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Session errors ───────────────────────────────────────────────
    #[error("Session has no {what} bound")]
    NotBound { what: &'static str },

    #[error("Invalid topic filter {filter:?}: {reason}")]
    InvalidTopic { filter: String, reason: String },

    // ── Message errors ───────────────────────────────────────────────
    #[error("Malformed message on {topic}: {message}")]
    MalformedMessage { topic: String, message: String },

    // ── Backend errors ───────────────────────────────────────────────
    #[error("Backend rejected request: {message}")]
    Rejected { message: String, code: i64 },

    #[error("API error: {message}")]
    Api { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Business rejections surface as action outcomes rather than errors.
    pub fn is_business_fault(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<caller_api::Error> for CoreError {
    fn from(err: caller_api::Error) -> Self {
        match err {
            caller_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            caller_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        endpoint: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                    }
                }
            }
            caller_api::Error::InvalidUrl(e) => CoreError::Api {
                message: format!("Invalid URL: {e}"),
            },
            caller_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            caller_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                endpoint: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            caller_api::Error::Backend { code, message } => CoreError::Rejected { message, code },
            caller_api::Error::BrokerConnect(reason) => CoreError::ConnectionFailed {
                endpoint: String::new(),
                reason,
            },
            caller_api::Error::Broker(message) => CoreError::Api { message },
            caller_api::Error::SubscriptionRefused { topic } => CoreError::Api {
                message: format!("broker refused subscription to {topic}"),
            },
            caller_api::Error::BrokerClosed => CoreError::NotConnected,
            caller_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
