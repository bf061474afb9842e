//! JMAP session model and request client
//!
//! Covers the slice of RFC 8620 the server needs: fetching the session
//! descriptor and posting method-call batches to the API endpoint. Mail
//! semantics (RFC 8621) live in [`crate::mail`].

use std::collections::BTreeMap;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::errors::{AppError, AppResult};
use crate::transport::{HttpRequest, HttpResponse, SharedTransport};

/// RFC 8620 core capability
pub const CAPABILITY_CORE: &str = "urn:ietf:params:jmap:core";
/// RFC 8621 mail capability
pub const CAPABILITY_MAIL: &str = "urn:ietf:params:jmap:mail";
/// RFC 8621 submission capability
pub const CAPABILITY_SUBMISSION: &str = "urn:ietf:params:jmap:submission";

/// Session descriptor returned by the discovery endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub capabilities: BTreeMap<String, Value>,
    #[serde(default)]
    pub accounts: BTreeMap<String, SessionAccount>,
    #[serde(default)]
    pub primary_accounts: BTreeMap<String, String>,
    #[serde(default)]
    pub username: String,
    pub api_url: String,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub upload_url: Option<String>,
    #[serde(default)]
    pub event_source_url: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl Session {
    /// Primary account id the server designates for mail
    pub fn primary_mail_account(&self) -> Option<&str> {
        self.primary_accounts
            .get(CAPABILITY_MAIL)
            .map(String::as_str)
    }
}

/// One account entry in the session descriptor
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAccount {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_personal: bool,
    #[serde(default)]
    pub is_read_only: bool,
    #[serde(default)]
    pub account_capabilities: BTreeMap<String, Value>,
}

/// A single method invocation: `[name, arguments, callId]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation(pub String, pub Value, pub String);

impl Invocation {
    pub fn new(name: &str, arguments: Value, call_id: &str) -> Self {
        Self(name.to_owned(), arguments, call_id.to_owned())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Request<'a> {
    using: &'a [&'a str],
    method_calls: Vec<Invocation>,
}

/// Response to a method-call batch
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodResponses {
    pub method_responses: Vec<Invocation>,
    #[serde(default)]
    pub session_state: Option<String>,
}

impl MethodResponses {
    /// Arguments of the response for `call_id`, deserialized
    ///
    /// # Errors
    ///
    /// - `Jmap` if the server answered that call with an `error` invocation
    /// - `Connectivity` if the call id is missing or the shape is unexpected
    pub fn take<T>(&self, method: &str, call_id: &str) -> AppResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let Invocation(name, arguments, _) = self
            .method_responses
            .iter()
            .find(|inv| inv.2 == call_id)
            .ok_or_else(|| {
                AppError::Connectivity(format!("response for {method} ({call_id}) missing"))
            })?;
        if name == "error" {
            return Err(AppError::Jmap {
                method: method.to_owned(),
                error_type: arguments
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_owned(),
                description: arguments
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("no description")
                    .to_owned(),
            });
        }
        serde_json::from_value(arguments.clone()).map_err(|e| {
            AppError::Connectivity(format!("unexpected {method} response shape: {e}"))
        })
    }
}

/// Authenticated JMAP client bound to one session's transport
///
/// Always sends `Authorization: Bearer <token>`; the auth adapter below it
/// turns that into Basic where the credential requires it.
pub struct JmapClient {
    transport: SharedTransport,
    session_url: String,
    bearer: SecretString,
}

impl JmapClient {
    pub fn new(transport: SharedTransport, session_url: &str, bearer: SecretString) -> Self {
        Self {
            transport,
            session_url: session_url.to_owned(),
            bearer,
        }
    }

    pub fn session_url(&self) -> &str {
        &self.session_url
    }

    fn authorize(&self, request: &mut HttpRequest) -> AppResult<()> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.bearer.expose_secret()))
            .map_err(|_| {
                AppError::Configuration("credential contains invalid header characters".to_owned())
            })?;
        value.set_sensitive(true);
        request.headers.insert(AUTHORIZATION, value);
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        Ok(())
    }

    /// Fetch and decode the session descriptor
    ///
    /// # Errors
    ///
    /// - `AuthFailed` on HTTP 401/403
    /// - `Connectivity` if unreachable, non-2xx, or not a session object
    #[instrument(skip(self), fields(url = %self.session_url))]
    pub async fn fetch_session(&self) -> AppResult<Session> {
        let mut request = HttpRequest::get(self.session_url.as_str());
        self.authorize(&mut request)?;
        let response = self.transport.send(request).await?;
        check_status(&response, "session discovery")?;
        let session: Session = serde_json::from_slice(&response.body).map_err(|e| {
            AppError::Connectivity(format!("malformed session descriptor: {e}"))
        })?;
        debug!(username = %session.username, accounts = session.accounts.len(), "session fetched");
        Ok(session)
    }

    /// Post a method-call batch to `api_url`
    ///
    /// # Errors
    ///
    /// - `AuthFailed` on HTTP 401/403
    /// - `Connectivity` for transport failures, non-2xx, or malformed bodies
    #[instrument(skip(self, using, calls), fields(calls = calls.len()))]
    pub async fn call(
        &self,
        api_url: &str,
        using: &[&str],
        calls: Vec<Invocation>,
    ) -> AppResult<MethodResponses> {
        let body = serde_json::to_vec(&Request {
            using,
            method_calls: calls,
        })
        .map_err(|e| AppError::Internal(format!("serialization failure: {e}")))?;
        let mut request = HttpRequest::post(api_url, body);
        self.authorize(&mut request)?;
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let response = self.transport.send(request).await?;
        check_status(&response, "api request")?;
        let responses: MethodResponses = serde_json::from_slice(&response.body)
            .map_err(|e| AppError::Connectivity(format!("malformed api response: {e}")))?;
        debug!(
            state = responses.session_state.as_deref().unwrap_or("-"),
            responses = responses.method_responses.len(),
            "api batch answered"
        );
        Ok(responses)
    }
}

/// Map HTTP status classes to application errors
fn check_status(response: &HttpResponse, what: &str) -> AppResult<()> {
    match response.status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AppError::AuthFailed(format!(
            "{what} rejected credentials ({})",
            response.status
        ))),
        status if status.is_success() => Ok(()),
        status => Err(AppError::Connectivity(format!(
            "{what} returned HTTP {status}"
        ))),
    }
}
