//! Account session initialization
//!
//! Builds one [`AccountSession`] per configured account: wrap the account's
//! transport in the auth adapter, fetch the session descriptor, resolve the
//! JMAP account id, classify capabilities. Any failure aborts that account
//! and, through the registry, the whole startup.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{info, instrument};

use crate::auth::AuthAdapter;
use crate::capabilities::{CapabilityFlags, classify};
use crate::config::AccountConfig;
use crate::errors::{AppError, AppResult};
use crate::jmap::{
    CAPABILITY_CORE, CAPABILITY_MAIL, CAPABILITY_SUBMISSION, Invocation, JmapClient,
    MethodResponses,
};
use crate::transport::SharedTransport;

/// Capabilities requested by read and write calls
const USING_MAIL: [&str; 2] = [CAPABILITY_CORE, CAPABILITY_MAIL];
/// Capabilities requested by submission calls
const USING_SUBMISSION: [&str; 3] = [CAPABILITY_CORE, CAPABILITY_MAIL, CAPABILITY_SUBMISSION];

/// Live, capability-annotated handle for one account
///
/// Immutable after construction; shared read-only by every tool call.
pub struct AccountSession {
    name: String,
    client: JmapClient,
    account_id: String,
    api_url: String,
    username: String,
    capabilities: Vec<String>,
    flags: CapabilityFlags,
    uses_basic: bool,
}

impl std::fmt::Debug for AccountSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSession")
            .field("name", &self.name)
            .field("account_id", &self.account_id)
            .field("api_url", &self.api_url)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl AccountSession {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server-assigned JMAP account id
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn session_url(&self) -> &str {
        self.client.session_url()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Session-level capability URIs, sorted
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.is_read_only
    }

    pub fn has_submission(&self) -> bool {
        self.flags.has_submission
    }

    /// Authentication scheme seen by the server
    pub fn auth_scheme(&self) -> &'static str {
        if self.uses_basic { "basic" } else { "bearer" }
    }

    /// Reject write operations on read-only accounts
    pub fn require_write(&self) -> AppResult<()> {
        if self.flags.is_read_only {
            return Err(AppError::Permission(format!(
                "account '{}' is read-only; write access is required",
                self.name
            )));
        }
        Ok(())
    }

    /// Reject sending on accounts without usable submission
    pub fn require_submission(&self) -> AppResult<()> {
        if !self.flags.has_submission {
            return Err(AppError::Permission(format!(
                "account '{}' lacks the submission capability",
                self.name
            )));
        }
        Ok(())
    }

    /// Run a mail method-call batch against this session
    pub async fn call(&self, calls: Vec<Invocation>) -> AppResult<MethodResponses> {
        self.client.call(&self.api_url, &USING_MAIL, calls).await
    }

    /// Run a batch that also needs the submission capability
    pub async fn call_with_submission(&self, calls: Vec<Invocation>) -> AppResult<MethodResponses> {
        self.client
            .call(&self.api_url, &USING_SUBMISSION, calls)
            .await
    }
}

/// Open an authenticated session for `account`
///
/// `transport` is the raw channel for this account; the auth adapter is layered
/// on top here so every session owns its own credential rewriting.
///
/// # Errors
///
/// - `AuthFailed` / `Connectivity` from session discovery
/// - `Connectivity` if no primary mail account exists or the resolved id is
///   absent from the descriptor
/// - `Capability` if the account lacks mail
#[instrument(skip(account, transport), fields(account = %account.credential.name))]
pub async fn open_session(
    session_url: &str,
    account: &AccountConfig,
    transport: SharedTransport,
) -> AppResult<AccountSession> {
    let name = account.credential.name.clone();
    let context = format!("account '{name}'");

    let adapter = AuthAdapter::new(transport, session_url, &account.credential.secret)
        .map_err(|e| e.context(&context))?;
    let uses_basic = adapter.uses_basic();
    // The client always speaks Bearer; with a Basic pair it carries the
    // password and the adapter swaps in the real header.
    let bearer = match account.credential.basic_pair() {
        Some((_, pass)) => SecretString::new(pass.into()),
        None => SecretString::new(account.credential.secret.expose_secret().into()),
    };
    let client = JmapClient::new(Arc::new(adapter), session_url, bearer);

    let session = client
        .fetch_session()
        .await
        .map_err(|e| e.context(&context))?;

    let account_id = match &account.account_id {
        Some(explicit) => explicit.clone(),
        None => session
            .primary_mail_account()
            .map(str::to_owned)
            .ok_or_else(|| {
                AppError::Connectivity(format!(
                    "{context}: session designates no primary mail account"
                ))
            })?,
    };
    let descriptor = session.accounts.get(&account_id).ok_or_else(|| {
        AppError::Connectivity(format!(
            "{context}: account id '{account_id}' is not in the session account list"
        ))
    })?;

    let flags = classify(&session.capabilities, descriptor);
    if !flags.is_mail {
        return Err(AppError::Capability(format!(
            "{context}: server does not advertise {CAPABILITY_MAIL}"
        )));
    }

    info!(
        account_id = %account_id,
        read_only = flags.is_read_only,
        submission = flags.has_submission,
        auth = if uses_basic { "basic" } else { "bearer" },
        "account session ready"
    );

    Ok(AccountSession {
        name,
        client,
        account_id,
        api_url: session.api_url,
        username: session.username,
        capabilities: session.capabilities.into_keys().collect(),
        flags,
        uses_basic,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use reqwest::header::AUTHORIZATION;
    use serde_json::{Value, json};

    use super::open_session;
    use crate::config::{AccountConfig, parse_account_blob};
    use crate::errors::AppError;
    use crate::transport::fake::{FakeTransport, json_response};

    pub const SESSION_URL: &str = "https://mail.example.com/.well-known/jmap";

    /// Session descriptor with one account `A1` plus an optional second `A2`
    pub fn descriptor(capabilities: &[&str], read_only: bool) -> Value {
        let caps: serde_json::Map<String, Value> = capabilities
            .iter()
            .map(|c| ((*c).to_owned(), json!({})))
            .collect();
        json!({
            "capabilities": caps,
            "accounts": {
                "A1": { "name": "primary", "isPersonal": true, "isReadOnly": read_only },
                "A2": { "name": "shared", "isPersonal": false, "isReadOnly": true }
            },
            "primaryAccounts": { "urn:ietf:params:jmap:mail": "A1" },
            "username": "alice@example.com",
            "apiUrl": "http://mail.example.com:8080/jmap/api/",
            "state": "s0"
        })
    }

    pub fn account(entry: &str, account_id: Option<&str>) -> AccountConfig {
        let credential = parse_account_blob(entry)
            .expect("valid entry")
            .remove(0);
        AccountConfig {
            credential,
            account_id: account_id.map(str::to_owned),
        }
    }

    pub const FULL: [&str; 3] = [
        "urn:ietf:params:jmap:core",
        "urn:ietf:params:jmap:mail",
        "urn:ietf:params:jmap:submission",
    ];

    #[tokio::test]
    async fn resolves_primary_account_and_repairs_api_url() {
        let body = descriptor(&FULL, false);
        let fake = Arc::new(FakeTransport::new(move |_| json_response(&body)));
        let session = open_session(SESSION_URL, &account("work:alice:pw", None), fake.clone())
            .await
            .expect("session opens");

        assert_eq!(session.name(), "work");
        assert_eq!(session.account_id(), "A1");
        assert_eq!(session.api_url(), "https://mail.example.com/jmap/api/");
        assert!(session.has_submission());
        assert_eq!(session.auth_scheme(), "basic");

        let expected = format!("Basic {}", STANDARD.encode("alice:pw"));
        assert_eq!(fake.recorded()[0].headers[AUTHORIZATION], expected.as_str());
    }

    #[tokio::test]
    async fn explicit_account_id_skips_discovery() {
        let body = descriptor(&FULL, false);
        let fake = Arc::new(FakeTransport::new(move |_| json_response(&body)));
        let session = open_session(SESSION_URL, &account("team:tok", Some("A2")), fake)
            .await
            .expect("session opens");
        assert_eq!(session.account_id(), "A2");
        assert!(session.is_read_only());
        assert!(!session.has_submission());
        assert_eq!(session.auth_scheme(), "bearer");
    }

    #[tokio::test]
    async fn unknown_account_id_fails() {
        let body = descriptor(&FULL, false);
        let fake = Arc::new(FakeTransport::new(move |_| json_response(&body)));
        let err = open_session(SESSION_URL, &account("team:tok", Some("ZZ")), fake)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Connectivity(_)));
        assert!(err.to_string().contains("ZZ"));
    }

    #[tokio::test]
    async fn missing_mail_capability_fails_construction() {
        let body = descriptor(&["urn:ietf:params:jmap:core"], false);
        let fake = Arc::new(FakeTransport::new(move |_| json_response(&body)));
        let err = open_session(SESSION_URL, &account("team:tok", None), fake)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Capability(_)));
    }

    #[tokio::test]
    async fn read_only_session_rejects_writes_and_sends() {
        let body = descriptor(&FULL, true);
        let fake = Arc::new(FakeTransport::new(move |_| json_response(&body)));
        let session = open_session(SESSION_URL, &account("ro:tok", None), fake)
            .await
            .expect("session opens");

        let write = session.require_write().expect_err("must fail");
        assert!(matches!(write, AppError::Permission(_)));
        assert!(write.to_string().contains("'ro'"));
        assert!(session.require_submission().is_err());
    }
}
