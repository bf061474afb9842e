//! Transport auth adapter
//!
//! Some deployments put a `username:password` pair where a bearer token is
//! expected. The JMAP client only speaks `Authorization: Bearer`, so this
//! middleware rewrites that header to HTTP Basic for requests aimed at the
//! configured server. It also repairs session descriptors that advertise
//! `http://host:8080` endpoints behind a TLS-terminating proxy.
//!
//! One adapter wraps exactly one session's transport. Credentials never leak
//! across accounts and unrelated traffic is forwarded untouched.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::future::BoxFuture;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, SharedTransport};

/// Keyword identifying JMAP traffic when the host differs from the session URL
const JMAP_KEYWORD: &str = "jmap";
/// Path of RFC 8620 session autodiscovery
const WELL_KNOWN_PATH: &str = "/.well-known/jmap";
/// Port misreported by proxied servers as a plain-HTTP endpoint
const REPAIRABLE_PORT: u16 = 8080;
/// Session descriptor fields holding URLs subject to repair
const REPAIRABLE_FIELDS: [&str; 4] = ["apiUrl", "downloadUrl", "uploadUrl", "eventSourceUrl"];

/// Auth-rewriting, response-repairing middleware around a transport
pub struct AuthAdapter {
    inner: SharedTransport,
    /// Host of the configured session endpoint
    target_host: Option<String>,
    /// Precomputed `Basic ...` header when the secret is a pair
    basic: Option<HeaderValue>,
}

impl AuthAdapter {
    /// Wrap `inner` for the session at `session_url`
    ///
    /// When `secret` contains `:` the part before the first `:` is the
    /// username and the rest the password; every matching request then
    /// carries Basic credentials. Otherwise the adapter only repairs
    /// responses.
    pub fn new(inner: SharedTransport, session_url: &str, secret: &SecretString) -> AppResult<Self> {
        let target_host = reqwest::Url::parse(session_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
        let basic = match secret.expose_secret().split_once(':') {
            Some((user, pass)) => Some(basic_header(user, pass)?),
            None => None,
        };
        Ok(Self {
            inner,
            target_host,
            basic,
        })
    }

    /// Whether the adapter converts Bearer to Basic
    pub fn uses_basic(&self) -> bool {
        self.basic.is_some()
    }

    /// Whether `url` points at the configured JMAP server
    fn targets_server(&self, url: &str) -> bool {
        let url = url.to_ascii_lowercase();
        self.target_host
            .as_deref()
            .is_some_and(|host| url.contains(host))
            || url.contains(JMAP_KEYWORD)
    }

    /// Replace `Bearer <x>` with the Basic header on matching requests
    fn rewrite_authorization(&self, request: &mut HttpRequest) {
        let Some(basic) = &self.basic else {
            return;
        };
        if !self.targets_server(&request.url) {
            return;
        }
        let is_bearer = request
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("Bearer "));
        if is_bearer {
            request.headers.insert(AUTHORIZATION, basic.clone());
        }
    }
}

impl HttpTransport for AuthAdapter {
    fn send(&self, mut request: HttpRequest) -> BoxFuture<'_, AppResult<HttpResponse>> {
        Box::pin(async move {
            self.rewrite_authorization(&mut request);
            let discovery = is_session_discovery(&request.url);
            let mut response = self.inner.send(request).await?;
            if discovery
                && response.status.is_success()
                && may_be_json(&response.headers)
                && let Some(body) = repair_session_body(&response.body)
            {
                debug!("repaired insecure endpoint in session descriptor");
                response.body = body;
            }
            Ok(response)
        })
    }
}

/// Build a sensitive `Authorization: Basic` header value
fn basic_header(user: &str, pass: &str) -> AppResult<HeaderValue> {
    let encoded = STANDARD.encode(format!("{user}:{pass}"));
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
        .map_err(|e| AppError::Internal(format!("invalid basic auth header: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Session-discovery requests are the only ones whose responses get repaired
fn is_session_discovery(url: &str) -> bool {
    url.contains("session") || url.contains(WELL_KNOWN_PATH)
}

/// A missing content type is tolerated; an explicit non-JSON one is not
fn may_be_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_none_or(|v| v.to_ascii_lowercase().contains("json"))
}

/// Rewrite misreported endpoint URLs inside a session descriptor
///
/// Returns `None` when the body is not a JSON object or nothing needed
/// repair; the caller then forwards the original bytes.
pub fn repair_session_body(body: &[u8]) -> Option<Vec<u8>> {
    let mut value: Value = serde_json::from_slice(body).ok()?;
    let object = value.as_object_mut()?;
    let mut changed = false;
    for field in REPAIRABLE_FIELDS {
        if let Some(Value::String(url)) = object.get_mut(field) {
            let repaired = repair_endpoint_url(url);
            if repaired != *url {
                *url = repaired;
                changed = true;
            }
        }
    }
    if !changed {
        return None;
    }
    serde_json::to_vec(&value).ok()
}

/// Turn `http://host:8080/...` into `https://host/...`
///
/// Works on the raw string so RFC 6570 templates such as
/// `{accountId}` in download URLs survive untouched. Any other URL is
/// returned unchanged, which also makes the repair idempotent.
pub fn repair_endpoint_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("http://") else {
        return url.to_owned();
    };
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);
    let port_suffix = format!(":{REPAIRABLE_PORT}");
    match authority.strip_suffix(port_suffix.as_str()) {
        Some(host) if !host.is_empty() => format!("https://{host}{tail}"),
        _ => url.to_owned(),
    }
}
