// Triage backend RPC client
//
// The core consumes the backend as an opaque `call(endpoint, payload)`
// capability (`RpcBackend`). `HttpBackend` is the production implementation:
// it attaches the session headers, posts JSON, and unwraps the
// `{ code, message, data }` envelope.

use std::sync::RwLock;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Business success code carried in the response envelope.
pub const SUCCESS_CODE: i64 = 200;

/// Characters `encodeURIComponent` leaves untouched; everything else is
/// percent-encoded before the org name is base64'd into its header.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

// ── Endpoint ─────────────────────────────────────────────────────────

/// Every backend operation the calling station issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Endpoint {
    ListQueue,
    CallPatient,
    PassPatient,
    EndPatient,
    MovePatient,
    DoctorStart,
    DoctorStop,
    ActiveVisit,
    ReassignTargets,
}

impl Endpoint {
    /// Path relative to the backend base URL.
    pub fn path(self) -> &'static str {
        match self {
            Self::ListQueue => "/lime/api/triage/patient/line/list",
            Self::CallPatient => "/lime/api/triage/patient/call",
            Self::PassPatient => "/lime/api/triage/patient/pass",
            Self::EndPatient => "/lime/api/triage/patient/end",
            Self::MovePatient => "/lime/api/triage/patient/move",
            Self::DoctorStart => "/lime/api/triage/doctor/start",
            Self::DoctorStop => "/lime/api/triage/doctor/stop",
            Self::ActiveVisit => "/lime/api/triage/doctor/visitPat",
            Self::ReassignTargets => "/lime/api/triage/doctor/qryUntreated",
        }
    }

    /// Whether the call mutates queue state on the server.
    pub fn is_mutation(self) -> bool {
        !matches!(
            self,
            Self::ListQueue | Self::ActiveVisit | Self::ReassignTargets
        )
    }
}

// ── RpcBackend ───────────────────────────────────────────────────────

/// Request/response capability against the triage backend.
///
/// Implementations return the envelope's `data` on success (`Value::Null`
/// when absent) and [`Error::Backend`] when the envelope carries a
/// non-success code.
#[async_trait]
pub trait RpcBackend: Send + Sync {
    async fn call(&self, endpoint: Endpoint, payload: Value) -> Result<Value, Error>;
}

// ── Envelope ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default, alias = "msg")]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

// ── Session headers ──────────────────────────────────────────────────

/// Organization identity sent on every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrgHeaders {
    pub org_id: String,
    pub org_code: String,
    pub org_name: String,
}

#[derive(Default)]
struct SessionHeaders {
    token: Option<SecretString>,
    org: Option<OrgHeaders>,
}

/// Strip a leading `Bearer ` (any case) so the header never doubles it.
fn bare_token(raw: &str) -> &str {
    let trimmed = raw.trim_start();
    match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => trimmed[7..].trim_start(),
        _ => trimmed,
    }
}

/// `base64(encodeURIComponent(name))`, the format the backend decodes.
pub fn encode_org_name(name: &str) -> String {
    let escaped = utf8_percent_encode(name, URI_COMPONENT).to_string();
    BASE64.encode(escaped.as_bytes())
}

// ── HttpBackend ──────────────────────────────────────────────────────

/// reqwest-backed [`RpcBackend`].
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: Url,
    session: RwLock<SessionHeaders>,
}

impl HttpBackend {
    /// Create a backend client rooted at `base_url`
    /// (e.g. `http://triage.clinic.local:3000`).
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url))
    }

    /// Create a backend client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            session: RwLock::new(SessionHeaders::default()),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Set (or clear) the session token sent as `Authorization`.
    pub fn set_token(&self, token: Option<SecretString>) {
        self.session
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .token = token;
    }

    /// Set (or clear) the organization headers.
    pub fn set_org(&self, org: Option<OrgHeaders>) {
        self.session
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .org = org;
    }

    fn endpoint_url(&self, endpoint: Endpoint) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{}", endpoint.path()))?)
    }

    fn session_headers(&self) -> Result<HeaderMap, Error> {
        let session = self
            .session
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut headers = HeaderMap::new();

        if let Some(token) = &session.token {
            let bare = bare_token(token.expose_secret());
            if !bare.is_empty() {
                headers.insert(AUTHORIZATION, header_value(bare)?);
            }
        }

        if let Some(org) = &session.org {
            headers.insert("orgid", header_value(&org.org_id)?);
            headers.insert("orgcode", header_value(&org.org_code)?);
            headers.insert("orgname", header_value(&encode_org_name(&org.org_name))?);
        }

        Ok(headers)
    }

    /// Parse the `{ code, message, data }` envelope, returning `data` on
    /// success.
    async fn parse_envelope(resp: reqwest::Response) -> Result<Value, Error> {
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "session expired, sign in again".into(),
            });
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        trace!(status = status.as_u16(), body = %body, "backend response");

        let envelope: Envelope = match serde_json::from_str(&body) {
            Ok(env) => env,
            Err(_) if !status.is_success() => {
                return Err(Error::Backend {
                    code: i64::from(status.as_u16()),
                    message: format!("request failed ({status})"),
                });
            }
            Err(e) => {
                return Err(Error::Deserialization {
                    message: e.to_string(),
                    body,
                });
            }
        };

        if envelope.code == SUCCESS_CODE && status.is_success() {
            Ok(envelope.data)
        } else {
            Err(Error::Backend {
                code: envelope.code,
                message: envelope
                    .message
                    .unwrap_or_else(|| format!("code={}", envelope.code)),
            })
        }
    }
}

fn header_value(raw: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(raw).map_err(|_| Error::Authentication {
        message: "session header contains invalid characters".into(),
    })
}

#[async_trait]
impl RpcBackend for HttpBackend {
    async fn call(&self, endpoint: Endpoint, payload: Value) -> Result<Value, Error> {
        let url = self.endpoint_url(endpoint)?;
        debug!(%endpoint, "POST {}", url);

        let resp = self
            .http
            .post(url)
            .headers(self.session_headers()?)
            .json(&payload)
            .send()
            .await
            .map_err(Error::Transport)?;

        Self::parse_envelope(resp).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bearer_prefix_is_stripped_case_insensitively() {
        assert_eq!(bare_token("Bearer abc.def"), "abc.def");
        assert_eq!(bare_token("bearer   xyz"), "xyz");
        assert_eq!(bare_token("raw-token"), "raw-token");
        assert_eq!(bare_token("Bear"), "Bear");
    }

    #[test]
    fn org_name_matches_uri_component_then_base64() {
        // encodeURIComponent("Clinic (A)") == "Clinic%20(A)"
        assert_eq!(encode_org_name("Clinic (A)"), BASE64.encode("Clinic%20(A)"));
        // Multi-byte names are escaped byte by byte.
        assert_eq!(encode_org_name("门诊"), BASE64.encode("%E9%97%A8%E8%AF%8A"));
    }

    #[test]
    fn endpoint_paths_and_mutation_flags() {
        assert_eq!(Endpoint::MovePatient.path(), "/lime/api/triage/patient/move");
        assert_eq!(Endpoint::ActiveVisit.to_string(), "active-visit");
        assert!(Endpoint::CallPatient.is_mutation());
        assert!(!Endpoint::ListQueue.is_mutation());
    }

    #[test]
    fn endpoint_url_tolerates_trailing_slash() {
        let backend = HttpBackend::with_client(
            reqwest::Client::new(),
            Url::parse("http://triage.local:3000/").unwrap(),
        );
        assert_eq!(
            backend.endpoint_url(Endpoint::EndPatient).unwrap().as_str(),
            "http://triage.local:3000/lime/api/triage/patient/end"
        );
    }
}
