//! Application error model with MCP error mapping
//!
//! Startup failures (configuration, connectivity, capability) are fatal and
//! propagate out of `main`. Per-call failures (lookup, permission, method
//! errors) are converted at the tool boundary into MCP `ErrorData` with a
//! structured `code` field.

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Application error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed environment input
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Account lacks a mandatory JMAP capability
    #[error("capability error: {0}")]
    Capability(String),
    /// Session endpoint unreachable, non-2xx, or malformed
    #[error("connectivity error: {0}")]
    Connectivity(String),
    /// Server rejected the credentials (HTTP 401/403)
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Unknown account, mailbox, email, or identity
    #[error("not found: {0}")]
    NotFound(String),
    /// Write or submission attempted on an account without that capability
    #[error("permission denied: {0}")]
    Permission(String),
    /// Invalid tool input
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// JMAP method-level error (`["error", {...}, callId]`)
    #[error("jmap method {method} failed: {error_type}: {description}")]
    Jmap {
        method: String,
        error_type: String,
        description: String,
    },
    /// Unexpected failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Prefix the message with `context`, keeping the variant
    pub fn context(self, context: &str) -> Self {
        let wrap = |msg: String| format!("{context}: {msg}");
        match self {
            Self::Configuration(m) => Self::Configuration(wrap(m)),
            Self::Capability(m) => Self::Capability(wrap(m)),
            Self::Connectivity(m) => Self::Connectivity(wrap(m)),
            Self::AuthFailed(m) => Self::AuthFailed(wrap(m)),
            Self::NotFound(m) => Self::NotFound(wrap(m)),
            Self::Permission(m) => Self::Permission(wrap(m)),
            Self::InvalidInput(m) => Self::InvalidInput(wrap(m)),
            Self::Internal(m) => Self::Internal(wrap(m)),
            jmap @ Self::Jmap { .. } => jmap,
        }
    }

    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Capability(_) => "capability",
            Self::Connectivity(_) => "connectivity",
            Self::AuthFailed(_) => "auth_failed",
            Self::NotFound(_) => "not_found",
            Self::Permission(_) => "permission_denied",
            Self::InvalidInput(_) => "invalid_input",
            Self::Jmap { .. } => "jmap_method_error",
            Self::Internal(_) => "internal",
        }
    }

    /// Convert to MCP `ErrorData`
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → `invalid_params`
    /// - `NotFound` → `resource_not_found`
    /// - `Permission`, `AuthFailed`, `Capability`, `Jmap` → `invalid_request`
    /// - everything else → `internal_error`
    pub fn to_error_data(&self) -> ErrorData {
        let msg = self.to_string();
        let data = Some(json!({ "code": self.code() }));
        match self {
            Self::InvalidInput(_) => ErrorData::invalid_params(msg, data),
            Self::NotFound(_) => ErrorData::resource_not_found(msg, data),
            Self::Permission(_) | Self::AuthFailed(_) | Self::Capability(_) | Self::Jmap { .. } => {
                ErrorData::invalid_request(msg, data)
            }
            Self::Configuration(_) | Self::Connectivity(_) | Self::Internal(_) => {
                ErrorData::internal_error(msg, data)
            }
        }
    }
}

/// Type alias for fallible return values
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn error_data_carries_structured_code() {
        let err = AppError::Permission("account 'ro' is read-only".to_owned());
        let data = err.to_error_data();
        assert_eq!(
            data.data.and_then(|d| d.get("code").cloned()),
            Some(serde_json::json!("permission_denied"))
        );
        assert!(data.message.contains("read-only"));
    }

    #[test]
    fn jmap_error_names_method_and_type() {
        let err = AppError::Jmap {
            method: "Email/set".to_owned(),
            error_type: "forbidden".to_owned(),
            description: "no".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "jmap method Email/set failed: forbidden: no"
        );
    }
}
