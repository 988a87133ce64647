use thiserror::Error;

/// Top-level error type for the `caller-api` crate.
///
/// Covers every failure mode across both wire surfaces: the triage HTTP
/// backend and the MQTT broker. `caller-core` maps these into user-facing
/// diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Token missing, expired, or rejected by the backend.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Triage backend ──────────────────────────────────────────────
    /// The backend answered with a non-success `code` in its envelope.
    #[error("Backend rejected request (code {code}): {message}")]
    Backend { code: i64, message: String },

    // ── Broker ──────────────────────────────────────────────────────
    /// The broker connection could not be opened.
    #[error("Broker connection failed: {0}")]
    BrokerConnect(String),

    /// A subscribe/unsubscribe/publish request was refused.
    #[error("Broker request failed: {0}")]
    Broker(String),

    /// The broker refused a subscription (SUBACK failure code).
    #[error("Subscription to {topic} refused by broker")]
    SubscriptionRefused { topic: String },

    /// The transport was terminated while a request was in flight.
    #[error("Broker transport closed")]
    BrokerClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates the session token is no
    /// longer accepted.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    ///
    /// Business rejections are never transient: the operator must
    /// re-trigger the action.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::BrokerConnect(_) | Self::BrokerClosed => true,
            _ => false,
        }
    }

    /// Extract the backend business code, if available.
    pub fn backend_code(&self) -> Option<i64> {
        match self {
            Self::Backend { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<rumqttc::ClientError> for Error {
    fn from(err: rumqttc::ClientError) -> Self {
        Self::Broker(err.to_string())
    }
}
