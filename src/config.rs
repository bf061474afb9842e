//! Configuration module for JMAP accounts and server settings
//!
//! Accounts come from one of two environment forms:
//!
//! - `JMAP_ACCOUNTS`: newline-separated `name:secret` entries
//! - `JMAP_BEARER_TOKEN`: a single `username:password` pair or opaque token
//!
//! The session discovery endpoint is shared by every account and read from
//! `JMAP_SESSION_URL`.

use std::collections::{HashMap, HashSet};
use std::env;
use std::env::VarError;
use std::ops::RangeInclusive;

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::errors::{AppError, AppResult};

/// Account name used when a single opaque token carries no username
pub const DEFAULT_ACCOUNT_NAME: &str = "default";

/// Characters of a malformed entry quoted in error messages
const ENTRY_PREVIEW_CHARS: usize = 20;

/// Accepted body truncation limits, for the default and per call
pub const BODY_MAX_CHARS_RANGE: RangeInclusive<usize> = 100..=100_000;

/// Parsed `name:secret` credential
///
/// The secret is either an opaque bearer token or a `username:password` pair.
#[derive(Debug, Clone)]
pub struct AccountCredential {
    /// Account name (non-empty, unique within a config)
    pub name: String,
    /// Bearer token or `username:password`
    pub secret: SecretString,
}

impl AccountCredential {
    /// Split the secret into `(username, password)` if it is a Basic pair
    pub fn basic_pair(&self) -> Option<(String, String)> {
        self.secret
            .expose_secret()
            .split_once(':')
            .map(|(user, pass)| (user.to_owned(), pass.to_owned()))
    }
}

/// Per-account configuration
#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub credential: AccountCredential,
    /// Explicit JMAP account id; skips primary-account discovery
    pub account_id: Option<String>,
}

/// Server-wide configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// JMAP session discovery endpoint
    pub session_url: String,
    /// Accounts in configuration order (first is the default)
    pub accounts: Vec<AccountConfig>,
    /// Transport connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Transport whole-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Default body truncation for fetched emails
    pub body_max_chars: usize,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the endpoint or credentials are missing or
    /// malformed, or a numeric setting cannot be parsed or is out of range.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// JMAP_SESSION_URL=https://mail.example.com/.well-known/jmap
    /// JMAP_ACCOUNTS="personal:fmu1-abcdef
    /// work:alice@example.com:app-password"
    /// JMAP_WORK_ACCOUNT_ID=u1a2b3c4
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let keys: Vec<String> = env::vars_os()
            .filter_map(|(key, _)| key.into_string().ok())
            .collect();
        Self::load_with(&keys, process_env)
    }

    /// Load configuration through `lookup`
    ///
    /// `env_keys` lists every variable name visible to `lookup`; it is only
    /// used to warn about orphan account id overrides.
    pub(crate) fn load_with<F>(env_keys: &[String], lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> AppResult<Option<String>>,
    {
        let session_url = normalize_session_url(&required_env(&lookup, "JMAP_SESSION_URL")?)?;

        let (credentials, single_form) = match lookup("JMAP_ACCOUNTS")? {
            Some(blob) => (parse_account_blob(&blob)?, false),
            None => match lookup("JMAP_BEARER_TOKEN")? {
                Some(token) => (vec![parse_single_credential(&token)?], true),
                None => {
                    return Err(AppError::Configuration(
                        "set JMAP_ACCOUNTS or JMAP_BEARER_TOKEN".to_owned(),
                    ));
                }
            },
        };
        if !single_form {
            reject_colliding_overrides(&credentials)?;
        }

        let mut accounts = Vec::with_capacity(credentials.len());
        for credential in credentials {
            let override_key = if single_form {
                "JMAP_ACCOUNT_ID".to_owned()
            } else {
                account_id_env_key(&credential.name)
            };
            accounts.push(AccountConfig {
                account_id: lookup(&override_key)?.map(|id| id.trim().to_owned()),
                credential,
            });
        }
        if !single_form {
            warn_orphan_overrides(&accounts, env_keys)?;
        }

        let body_max_chars = parse_usize_env(&lookup, "JMAP_BODY_MAX_CHARS", 20_000)?;
        if !BODY_MAX_CHARS_RANGE.contains(&body_max_chars) {
            return Err(AppError::Configuration(format!(
                "JMAP_BODY_MAX_CHARS must be in range {}..{}",
                BODY_MAX_CHARS_RANGE.start(),
                BODY_MAX_CHARS_RANGE.end()
            )));
        }

        Ok(Self {
            session_url,
            accounts,
            connect_timeout_ms: parse_u64_env(&lookup, "JMAP_CONNECT_TIMEOUT_MS", 30_000)?,
            request_timeout_ms: parse_u64_env(&lookup, "JMAP_REQUEST_TIMEOUT_MS", 120_000)?,
            body_max_chars,
        })
    }
}

/// Parse the multi-account blob into credentials, preserving order
///
/// Entries are newline-separated and trimmed; blank lines are skipped. Each
/// entry splits at its first `:` into `name` and `secret`.
///
/// # Errors
///
/// Returns `Configuration` for an entry without `:` (quoting a 20-char
/// preview only), an empty name, a duplicate name, or an empty blob.
pub fn parse_account_blob(blob: &str) -> AppResult<Vec<AccountCredential>> {
    let mut seen = HashSet::new();
    let mut credentials = Vec::new();
    for entry in blob.lines().map(str::trim).filter(|e| !e.is_empty()) {
        let Some((name, secret)) = entry.split_once(':') else {
            return Err(AppError::Configuration(format!(
                "account entry must be name:token, got '{}...'",
                entry_preview(entry)
            )));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Configuration(format!(
                "account name cannot be empty in entry '{}...'",
                entry_preview(entry)
            )));
        }
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(AppError::Configuration(format!(
                "account '{name}' has an empty token"
            )));
        }
        if !seen.insert(name.to_owned()) {
            return Err(AppError::Configuration(format!(
                "account '{name}' is configured more than once"
            )));
        }
        credentials.push(AccountCredential {
            name: name.to_owned(),
            secret: SecretString::new(secret.to_owned().into()),
        });
    }
    if credentials.is_empty() {
        return Err(AppError::Configuration(
            "JMAP_ACCOUNTS contains no account entries".to_owned(),
        ));
    }
    Ok(credentials)
}

/// Parse the single-account credential
///
/// A `username:password` value keeps the whole pair as its secret and uses the
/// username as account name; an opaque token is named [`DEFAULT_ACCOUNT_NAME`].
pub fn parse_single_credential(token: &str) -> AppResult<AccountCredential> {
    let token = token.trim();
    let name = match token.split_once(':') {
        Some((user, _)) => user,
        None => DEFAULT_ACCOUNT_NAME,
    };
    if name.is_empty() {
        return Err(AppError::Configuration(
            "JMAP_BEARER_TOKEN username cannot be empty".to_owned(),
        ));
    }
    Ok(AccountCredential {
        name: name.to_owned(),
        secret: SecretString::new(token.to_owned().into()),
    })
}

/// Bounded preview of a config entry so secrets never reach logs in full
fn entry_preview(entry: &str) -> String {
    entry.chars().take(ENTRY_PREVIEW_CHARS).collect()
}

/// Append the well-known discovery path to a bare origin
fn normalize_session_url(raw: &str) -> AppResult<String> {
    let mut url = reqwest::Url::parse(raw.trim()).map_err(|e| {
        AppError::Configuration(format!("JMAP_SESSION_URL is not a valid URL: {e}"))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::Configuration(
            "JMAP_SESSION_URL must use http or https".to_owned(),
        ));
    }
    if url.host_str().is_none() {
        return Err(AppError::Configuration(
            "JMAP_SESSION_URL must include a host".to_owned(),
        ));
    }
    if url.path() == "/" || url.path().is_empty() {
        url.set_path("/.well-known/jmap");
    }
    Ok(url.to_string())
}

/// Environment key holding the account id override for a named account
fn account_id_env_key(name: &str) -> String {
    format!("JMAP_{}_ACCOUNT_ID", sanitize_segment(name))
}

/// Two names sharing one override variable would silently share its value
fn reject_colliding_overrides(credentials: &[AccountCredential]) -> AppResult<()> {
    let mut by_key: HashMap<String, &str> = HashMap::new();
    for credential in credentials {
        let key = account_id_env_key(&credential.name);
        if let Some(other) = by_key.insert(key.clone(), &credential.name) {
            return Err(AppError::Configuration(format!(
                "accounts '{other}' and '{}' both map to {key}; rename one",
                credential.name
            )));
        }
    }
    Ok(())
}

/// Warn about `JMAP_<NAME>_ACCOUNT_ID` variables that match no account
fn warn_orphan_overrides(accounts: &[AccountConfig], env_keys: &[String]) -> AppResult<()> {
    let pattern = Regex::new(r"^JMAP_([A-Z0-9_]+)_ACCOUNT_ID$")
        .map_err(|e| AppError::Internal(format!("invalid override regex: {e}")))?;
    let known: HashSet<String> = accounts
        .iter()
        .map(|a| sanitize_segment(&a.credential.name))
        .collect();
    for key in env_keys {
        if let Some(segment) = pattern.captures(key).and_then(|c| c.get(1))
            && !known.contains(segment.as_str())
        {
            warn!(variable = %key, "account id override matches no configured account");
        }
    }
    Ok(())
}

/// Sanitize an account name to uppercase alphanumeric/underscore
fn sanitize_segment(seg: &str) -> String {
    let mut out = String::with_capacity(seg.len());
    for ch in seg.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push('_');
        }
    }
    out.trim_matches('_').to_owned()
}

/// Read a required variable, returning error if missing or empty
fn required_env<F>(lookup: &F, key: &str) -> AppResult<String>
where
    F: Fn(&str) -> AppResult<Option<String>>,
{
    lookup(key)?.ok_or_else(|| {
        AppError::Configuration(format!("missing required environment variable {key}"))
    })
}

/// Read a process environment variable; blank values count as unset
fn process_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::Configuration(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u64` variable with default fallback
fn parse_u64_env<F>(lookup: &F, key: &str, default: u64) -> AppResult<u64>
where
    F: Fn(&str) -> AppResult<Option<String>>,
{
    match lookup(key)? {
        Some(v) => v.trim().parse::<u64>().map_err(|_| {
            AppError::Configuration(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

/// Parse a `usize` variable with default fallback
fn parse_usize_env<F>(lookup: &F, key: &str, default: usize) -> AppResult<usize>
where
    F: Fn(&str) -> AppResult<Option<String>>,
{
    match lookup(key)? {
        Some(v) => v.trim().parse::<usize>().map_err(|_| {
            AppError::Configuration(format!("invalid usize environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use secrecy::ExposeSecret;

    use super::{
        DEFAULT_ACCOUNT_NAME, ServerConfig, account_id_env_key, normalize_session_url,
        parse_account_blob, parse_single_credential,
    };
    use crate::errors::{AppError, AppResult};

    fn load(vars: &[(&str, &str)]) -> AppResult<ServerConfig> {
        let map: BTreeMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        let keys: Vec<String> = map.keys().cloned().collect();
        ServerConfig::load_with(&keys, |key| Ok(map.get(key).cloned()))
    }

    const URL: (&str, &str) = ("JMAP_SESSION_URL", "https://mail.example.com");

    #[test]
    fn missing_session_url_is_rejected() {
        let err = load(&[("JMAP_BEARER_TOKEN", "tok")]).expect_err("must fail");
        assert!(matches!(err, AppError::Configuration(_)));
        assert!(err.to_string().contains("JMAP_SESSION_URL"));
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let err = load(&[URL]).expect_err("must fail");
        assert!(err.to_string().contains("JMAP_ACCOUNTS or JMAP_BEARER_TOKEN"));
    }

    #[test]
    fn account_blob_wins_over_single_token() {
        let config = load(&[
            URL,
            ("JMAP_ACCOUNTS", "personal:tok-1\nwork:alice:pw"),
            ("JMAP_BEARER_TOKEN", "ignored"),
        ])
        .expect("loads");
        let names: Vec<_> = config
            .accounts
            .iter()
            .map(|a| a.credential.name.as_str())
            .collect();
        assert_eq!(names, ["personal", "work"]);
        assert_eq!(config.session_url, "https://mail.example.com/.well-known/jmap");
        assert_eq!(config.body_max_chars, 20_000);
    }

    #[test]
    fn overrides_are_read_per_form() {
        let single = load(&[
            URL,
            ("JMAP_BEARER_TOKEN", "tok"),
            ("JMAP_ACCOUNT_ID", "u123"),
        ])
        .expect("loads");
        assert_eq!(single.accounts[0].credential.name, DEFAULT_ACCOUNT_NAME);
        assert_eq!(single.accounts[0].account_id.as_deref(), Some("u123"));

        let multi = load(&[
            URL,
            ("JMAP_ACCOUNTS", "personal:tok-1\nwork-mail:tok-2"),
            ("JMAP_ACCOUNT_ID", "not-used"),
            ("JMAP_WORK_MAIL_ACCOUNT_ID", "u456"),
        ])
        .expect("loads");
        assert_eq!(multi.accounts[0].account_id, None);
        assert_eq!(multi.accounts[1].account_id.as_deref(), Some("u456"));
    }

    #[test]
    fn names_sharing_an_override_key_are_rejected() {
        let err = load(&[URL, ("JMAP_ACCOUNTS", "work-mail:tok-1\nwork.mail:tok-2")])
            .expect_err("must fail");
        let msg = err.to_string();
        assert!(msg.contains("'work-mail'"));
        assert!(msg.contains("'work.mail'"));
        assert!(msg.contains("JMAP_WORK_MAIL_ACCOUNT_ID"));
    }

    #[test]
    fn body_limit_out_of_range_fails_startup() {
        for value in ["50", "200000"] {
            let err = load(&[
                URL,
                ("JMAP_BEARER_TOKEN", "tok"),
                ("JMAP_BODY_MAX_CHARS", value),
            ])
            .expect_err("must fail");
            assert!(matches!(err, AppError::Configuration(_)));
        }
        let config = load(&[
            URL,
            ("JMAP_BEARER_TOKEN", "tok"),
            ("JMAP_BODY_MAX_CHARS", "100"),
        ])
        .expect("lower bound accepted");
        assert_eq!(config.body_max_chars, 100);
    }

    #[test]
    fn blob_secrets_are_trimmed() {
        let creds = parse_account_blob("work: tok \nhome:  alice:pw").expect("parses");
        assert_eq!(creds[0].secret.expose_secret(), "tok");
        assert_eq!(creds[1].secret.expose_secret(), "alice:pw");
        assert!(parse_account_blob("work:   ").is_err());
    }

    #[test]
    fn blob_yields_every_entry_in_order() {
        let blob = "personal:tok-1\n\n  work:alice@example.com:pw  \nshared:tok:with:colons\n";
        let creds = parse_account_blob(blob).expect("blob parses");
        let names: Vec<_> = creds.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["personal", "work", "shared"]);
        assert_eq!(creds[0].secret.expose_secret(), "tok-1");
        assert_eq!(creds[1].secret.expose_secret(), "alice@example.com:pw");
        assert_eq!(creds[2].secret.expose_secret(), "tok:with:colons");
    }

    #[test]
    fn malformed_entry_quotes_bounded_preview_only() {
        let secret = "averyveryverylongsecretwithoutanyseparator";
        let err = parse_account_blob(&format!("ok:tok\n{secret}")).expect_err("must fail");
        let msg = err.to_string();
        assert!(msg.contains("averyveryverylongsec"));
        assert!(!msg.contains(secret));
    }

    #[test]
    fn rejects_empty_name_and_duplicates() {
        assert!(parse_account_blob(":token").is_err());
        let err = parse_account_blob("a:1\na:2").expect_err("duplicate must fail");
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn rejects_blank_blob() {
        assert!(parse_account_blob("\n  \n").is_err());
    }

    #[test]
    fn single_credential_uses_username_or_sentinel() {
        let basic = parse_single_credential("alice:s3cret").expect("parses");
        assert_eq!(basic.name, "alice");
        assert_eq!(basic.secret.expose_secret(), "alice:s3cret");
        assert_eq!(
            basic.basic_pair(),
            Some(("alice".to_owned(), "s3cret".to_owned()))
        );

        let opaque = parse_single_credential("fmu1-opaque").expect("parses");
        assert_eq!(opaque.name, DEFAULT_ACCOUNT_NAME);
        assert!(opaque.basic_pair().is_none());
    }

    #[test]
    fn override_key_is_sanitized() {
        assert_eq!(account_id_env_key("work-mail"), "JMAP_WORK_MAIL_ACCOUNT_ID");
    }

    #[test]
    fn bare_origin_gets_well_known_path() {
        assert_eq!(
            normalize_session_url("https://mail.example.com").expect("valid"),
            "https://mail.example.com/.well-known/jmap"
        );
        assert_eq!(
            normalize_session_url("https://api.example.com/jmap/session").expect("valid"),
            "https://api.example.com/jmap/session"
        );
        assert!(normalize_session_url("ftp://example.com").is_err());
    }
}
