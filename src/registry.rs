//! Account registry
//!
//! Ordered, immutable mapping from account name to [`AccountSession`]. Built
//! once at startup, then shared by `Arc` with every tool invocation.

use std::sync::Arc;

use tracing::info;

use crate::config::{AccountConfig, ServerConfig};
use crate::errors::{AppError, AppResult};
use crate::session::{AccountSession, open_session};
use crate::transport::{ReqwestTransport, SharedTransport};

/// Introspection record for one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSummary {
    pub name: String,
    pub account_id: String,
    pub is_read_only: bool,
    pub has_submission: bool,
}

/// Resolved sessions in configuration order; the first is the default
#[derive(Debug)]
pub struct AccountRegistry {
    sessions: Vec<AccountSession>,
}

impl AccountRegistry {
    /// Open every configured account over live `reqwest` transports
    ///
    /// # Errors
    ///
    /// Fails on the first account that cannot be opened; no account is served
    /// in that case.
    pub async fn connect(config: &ServerConfig) -> AppResult<Self> {
        Self::connect_with(config, |_| {
            let transport: SharedTransport = Arc::new(ReqwestTransport::new(config)?);
            Ok(transport)
        })
        .await
    }

    /// Open every configured account over transports built by `make_transport`
    ///
    /// Accounts are opened one after another in configuration order.
    pub async fn connect_with<F>(config: &ServerConfig, make_transport: F) -> AppResult<Self>
    where
        F: Fn(&AccountConfig) -> AppResult<SharedTransport>,
    {
        let mut sessions = Vec::with_capacity(config.accounts.len());
        for account in &config.accounts {
            let transport = make_transport(account)?;
            sessions.push(open_session(&config.session_url, account, transport).await?);
        }
        let registry = Self::from_sessions(sessions)?;
        info!(
            accounts = registry.sessions.len(),
            write = registry.any_write_access(),
            submission = registry.any_submission(),
            "account registry ready"
        );
        Ok(registry)
    }

    /// Build from already-open sessions
    ///
    /// # Errors
    ///
    /// `Configuration` if `sessions` is empty or names repeat.
    pub fn from_sessions(sessions: Vec<AccountSession>) -> AppResult<Self> {
        if sessions.is_empty() {
            return Err(AppError::Configuration(
                "no accounts configured".to_owned(),
            ));
        }
        for (i, session) in sessions.iter().enumerate() {
            if sessions[..i].iter().any(|s| s.name() == session.name()) {
                return Err(AppError::Configuration(format!(
                    "account '{}' is configured more than once",
                    session.name()
                )));
            }
        }
        Ok(Self { sessions })
    }

    /// Resolve an account by name, or the default when `name` is `None`
    ///
    /// # Errors
    ///
    /// `NotFound` listing every configured name when `name` is unknown.
    pub fn resolve(&self, name: Option<&str>) -> AppResult<&AccountSession> {
        let Some(name) = name else {
            return Ok(self.default_session());
        };
        self.sessions
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "account '{name}' is not configured; available accounts: {}",
                    self.names().join(", ")
                ))
            })
    }

    /// First-configured session
    pub fn default_session(&self) -> &AccountSession {
        // non-empty by construction
        &self.sessions[0]
    }

    /// Account names in configuration order
    pub fn names(&self) -> Vec<&str> {
        self.sessions.iter().map(AccountSession::name).collect()
    }

    /// Summaries of every account in configuration order
    pub fn list_all(&self) -> Vec<AccountSummary> {
        self.sessions
            .iter()
            .map(|s| AccountSummary {
                name: s.name().to_owned(),
                account_id: s.account_id().to_owned(),
                is_read_only: s.is_read_only(),
                has_submission: s.has_submission(),
            })
            .collect()
    }

    /// Whether any account accepts writes
    pub fn any_write_access(&self) -> bool {
        self.sessions.iter().any(|s| !s.is_read_only())
    }

    /// Whether any account can submit mail
    pub fn any_submission(&self) -> bool {
        self.sessions.iter().any(AccountSession::has_submission)
    }
}
