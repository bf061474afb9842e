//! Input/output DTOs and schema-bearing types
//!
//! Defines all data structures used in MCP tool contracts. Each type is
//! annotated with `JsonSchema` for automatic schema generation.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metadata included in all tool responses
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
///
/// Wraps tool-specific data with human-readable summary and execution metadata.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    /// Human-readable summary of the operation outcome
    pub summary: String,
    /// Tool-specific data payload
    pub data: T,
    /// Execution metadata (timestamp, duration)
    pub meta: Meta,
}

/// Account metadata (no credentials)
///
/// Returned by `list_accounts`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountInfo {
    /// Configured account name
    pub name: String,
    /// Server-assigned JMAP account id
    pub account_id: String,
    /// Whether the server marks the account read-only
    pub is_read_only: bool,
    /// Whether sending is available for this account
    pub has_submission: bool,
}

/// Session details for one account
///
/// Returned by `get_session`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionInfo {
    pub name: String,
    pub account_id: String,
    /// Username reported by the session descriptor
    pub username: String,
    pub session_url: String,
    /// API endpoint after any repair
    pub api_url: String,
    /// `basic` or `bearer`
    pub auth_scheme: String,
    /// Session capability URIs
    pub capabilities: Vec<String>,
    pub is_read_only: bool,
    pub has_submission: bool,
}

/// Mailbox metadata
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MailboxInfo {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    /// Role such as `inbox`, `drafts`, `sent`
    pub role: Option<String>,
    pub total_emails: u64,
    pub unread_emails: u64,
}

/// Email address with optional display name
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EmailAddress {
    pub name: Option<String>,
    pub email: String,
}

/// Email summary for search results
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EmailSummary {
    pub id: String,
    pub thread_id: Option<String>,
    /// RFC 3339 receive time
    pub received_at: Option<String>,
    pub from: Vec<EmailAddress>,
    pub subject: Option<String>,
    /// Server-generated plain text preview
    pub preview: Option<String>,
    /// Keywords set on the email (e.g., `$seen`, `$flagged`, `$draft`)
    pub keywords: Vec<String>,
    pub mailbox_ids: Vec<String>,
    pub has_attachment: bool,
}

/// Full email detail
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EmailDetail {
    pub id: String,
    pub thread_id: Option<String>,
    pub received_at: Option<String>,
    pub from: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub subject: Option<String>,
    pub keywords: Vec<String>,
    pub mailbox_ids: Vec<String>,
    pub has_attachment: bool,
    /// Plain text body (truncated to `body_max_chars`)
    pub body_text: Option<String>,
    /// Whether `body_text` was cut short
    pub body_truncated: bool,
}

/// Search result page
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchResult {
    pub account: String,
    /// Total matches, when the server calculates it
    pub total: Option<u64>,
    /// Zero-based position of the first returned email
    pub position: u64,
    pub emails: Vec<EmailSummary>,
    /// Position to request for the next page, if more remain
    pub next_position: Option<u64>,
}

/// Result of an email mutation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UpdateResult {
    pub account: String,
    pub updated: Vec<String>,
    /// Email ids the server refused to update, with reasons
    pub not_updated: Vec<(String, String)>,
}

/// Result of draft creation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DraftResult {
    pub account: String,
    pub email_id: String,
    pub mailbox_id: String,
}

/// Result of submission
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubmissionResult {
    pub account: String,
    pub submission_id: String,
    pub email_id: String,
    pub identity_id: String,
}

/// Input: account only
///
/// Used by `get_session` and `list_mailboxes`.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct AccountOnlyInput {
    /// Account name (defaults to the first configured account)
    pub account: Option<String>,
}

/// Input: search emails
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct SearchEmailsInput {
    /// Account name (defaults to the first configured account)
    pub account: Option<String>,
    /// Restrict to one mailbox id
    pub mailbox_id: Option<String>,
    /// Full-text search
    pub text: Option<String>,
    /// Filter by From
    pub from: Option<String>,
    /// Filter by To
    pub to: Option<String>,
    /// Filter by Subject
    pub subject: Option<String>,
    /// Only emails without `$seen`
    #[serde(default)]
    pub unread_only: bool,
    /// Only emails received on or after this date (YYYY-MM-DD)
    pub after: Option<String>,
    /// Only emails received before this date (YYYY-MM-DD)
    pub before: Option<String>,
    /// Zero-based result offset
    #[serde(default)]
    pub position: u64,
    /// Maximum emails to return (1..100, default 20)
    #[serde(default = "default_limit")]
    pub limit: u64,
}

/// Input: get one email
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetEmailInput {
    /// Account name (defaults to the first configured account)
    pub account: Option<String>,
    /// JMAP email id
    pub email_id: String,
    /// Maximum body characters (100..100000)
    pub body_max_chars: Option<usize>,
}

/// Input: set or clear `$seen` / `$flagged`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateEmailKeywordsInput {
    /// Account name (defaults to the first configured account)
    pub account: Option<String>,
    /// Email ids to update (1..50)
    pub email_ids: Vec<String>,
    /// Mark read (`true`) or unread (`false`)
    pub seen: Option<bool>,
    /// Flag (`true`) or unflag (`false`)
    pub flagged: Option<bool>,
}

/// Input: move emails to a mailbox
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MoveEmailInput {
    /// Account name (defaults to the first configured account)
    pub account: Option<String>,
    /// Email ids to move (1..50)
    pub email_ids: Vec<String>,
    /// Destination mailbox id
    pub mailbox_id: String,
}

/// Input: create a draft in the Drafts mailbox
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateDraftInput {
    /// Account name (defaults to the first configured account)
    pub account: Option<String>,
    /// Sender address (defaults to the session username)
    pub from: Option<String>,
    /// Recipient addresses
    pub to: Vec<String>,
    /// Carbon-copy addresses
    #[serde(default)]
    pub cc: Vec<String>,
    pub subject: String,
    /// Plain text body
    pub body: String,
}

/// Input: send an existing draft
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SendDraftInput {
    /// Account name (defaults to the first configured account)
    pub account: Option<String>,
    /// Draft email id
    pub email_id: String,
    /// Sending identity id (defaults to the identity matching the draft sender)
    pub identity_id: Option<String>,
}

/// Default value for `limit` in search
fn default_limit() -> u64 {
    20
}
