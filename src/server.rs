//! MCP server implementation with tool handlers
//!
//! Registers read tools unconditionally, write tools only when some account
//! accepts writes and the submission tool only when some account can send.
//! Handlers validate input, resolve the target account through the registry
//! and delegate to [`crate::mail`].

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};
use tracing::debug;

use crate::config::BODY_MAX_CHARS_RANGE;
use crate::errors::{AppError, AppResult};
use crate::mail::{self, DraftRequest};
use crate::models::{
    AccountInfo, AccountOnlyInput, CreateDraftInput, DraftResult, EmailDetail, GetEmailInput,
    MailboxInfo, Meta, MoveEmailInput, SearchEmailsInput, SearchResult, SendDraftInput,
    SessionInfo, SubmissionResult, ToolEnvelope, UpdateEmailKeywordsInput, UpdateResult,
};
use crate::registry::AccountRegistry;

/// Maximum emails per search page
const MAX_SEARCH_LIMIT: u64 = 100;
/// Maximum emails per mutation
const MAX_EMAIL_IDS: usize = 50;
/// Maximum recipients per draft
const MAX_RECIPIENTS: usize = 50;
/// Maximum draft body size in characters
const MAX_DRAFT_BODY_CHARS: usize = 100_000;

/// JMAP MCP server
///
/// Cheap to clone: the registry is shared and immutable after startup.
#[derive(Clone)]
pub struct JmapMcpServer {
    registry: Arc<AccountRegistry>,
    /// Default truncation for `get_email` bodies
    body_max_chars: usize,
    tool_router: ToolRouter<Self>,
}

impl JmapMcpServer {
    /// Create a server whose tool set follows the registry's aggregate access
    pub fn new(registry: Arc<AccountRegistry>, body_max_chars: usize) -> Self {
        let mut tool_router = Self::read_tools();
        if registry.any_write_access() {
            tool_router = tool_router + Self::write_tools();
        }
        if registry.any_submission() {
            tool_router = tool_router + Self::submission_tools();
        }
        debug!(
            tools = tool_router.list_all().len(),
            "tool router assembled"
        );
        Self {
            registry,
            body_max_chars,
            tool_router,
        }
    }
}

#[tool_router(router = read_tools)]
impl JmapMcpServer {
    /// Tool: List configured accounts
    ///
    /// Names, JMAP account ids and access flags; never credentials.
    #[tool(
        name = "list_accounts",
        description = "List configured JMAP accounts with read-only and submission flags"
    )]
    async fn list_accounts(&self) -> Result<Json<ToolEnvelope<Vec<AccountInfo>>>, ErrorData> {
        let started = Instant::now();
        let data = self.list_accounts_impl();
        finalize_tool(
            started,
            Ok((format!("{} account(s) configured", data.len()), data)),
        )
    }

    #[tool(
        name = "get_session",
        description = "Show session details and capabilities for an account"
    )]
    async fn get_session(
        &self,
        Parameters(input): Parameters<AccountOnlyInput>,
    ) -> Result<Json<ToolEnvelope<SessionInfo>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.get_session_impl(&input).map(|data| {
                (
                    format!("Session for account '{}' ({})", data.name, data.account_id),
                    data,
                )
            }),
        )
    }

    #[tool(name = "list_mailboxes", description = "List mailboxes for an account")]
    async fn list_mailboxes(
        &self,
        Parameters(input): Parameters<AccountOnlyInput>,
    ) -> Result<Json<ToolEnvelope<Vec<MailboxInfo>>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.list_mailboxes_impl(&input)
                .await
                .map(|data| (format!("{} mailbox(es)", data.len()), data)),
        )
    }

    /// Tool: Search emails, newest first
    ///
    /// Filters combine with AND. Pagination is position-based; pass
    /// `next_position` back as `position` for the following page.
    #[tool(
        name = "search_emails",
        description = "Search emails newest first with position pagination"
    )]
    async fn search_emails(
        &self,
        Parameters(input): Parameters<SearchEmailsInput>,
    ) -> Result<Json<ToolEnvelope<SearchResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.search_emails_impl(&input)
                .await
                .map(|data| (format!("{} email(s) returned", data.emails.len()), data)),
        )
    }

    #[tool(name = "get_email", description = "Get one email with its plain text body")]
    async fn get_email(
        &self,
        Parameters(input): Parameters<GetEmailInput>,
    ) -> Result<Json<ToolEnvelope<EmailDetail>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.get_email_impl(&input)
                .await
                .map(|data| ("Email retrieved".to_owned(), data)),
        )
    }
}

#[tool_router(router = write_tools)]
impl JmapMcpServer {
    /// Tool: Mark emails read/unread and flagged/unflagged
    #[tool(
        name = "update_email_keywords",
        description = "Set or clear $seen and $flagged on emails"
    )]
    async fn update_email_keywords(
        &self,
        Parameters(input): Parameters<UpdateEmailKeywordsInput>,
    ) -> Result<Json<ToolEnvelope<UpdateResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.update_keywords_impl(&input)
                .await
                .map(|data| (format!("{} email(s) updated", data.updated.len()), data)),
        )
    }

    /// Tool: Move emails into one mailbox
    ///
    /// Replaces every mailbox membership of each email.
    #[tool(name = "move_email", description = "Move emails to a mailbox")]
    async fn move_email(
        &self,
        Parameters(input): Parameters<MoveEmailInput>,
    ) -> Result<Json<ToolEnvelope<UpdateResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.move_email_impl(&input)
                .await
                .map(|data| (format!("{} email(s) moved", data.updated.len()), data)),
        )
    }

    #[tool(
        name = "create_draft",
        description = "Create a plain text draft in the Drafts mailbox"
    )]
    async fn create_draft(
        &self,
        Parameters(input): Parameters<CreateDraftInput>,
    ) -> Result<Json<ToolEnvelope<DraftResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.create_draft_impl(&input)
                .await
                .map(|data| ("Draft created".to_owned(), data)),
        )
    }
}

#[tool_router(router = submission_tools)]
impl JmapMcpServer {
    /// Tool: Send an existing draft
    ///
    /// Requires an account with the submission capability that is not
    /// read-only.
    #[tool(name = "send_draft", description = "Send an existing draft")]
    async fn send_draft(
        &self,
        Parameters(input): Parameters<SendDraftInput>,
    ) -> Result<Json<ToolEnvelope<SubmissionResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.send_draft_impl(&input)
                .await
                .map(|data| ("Draft submitted".to_owned(), data)),
        )
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for JmapMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut instructions = format!(
            "JMAP mail server for accounts: {}. Omit `account` to use the first one.",
            self.registry.names().join(", ")
        );
        if !self.registry.any_write_access() {
            instructions.push_str(" All accounts are read-only.");
        } else if !self.registry.any_submission() {
            instructions.push_str(" No account can send mail.");
        }
        let mut info = ServerInfo::default();
        info.instructions = Some(instructions);
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info
    }
}

/// Tool implementation methods
///
/// Shared by the MCP handlers above and the compact CLI.
impl JmapMcpServer {
    pub(crate) fn list_accounts_impl(&self) -> Vec<AccountInfo> {
        self.registry
            .list_all()
            .into_iter()
            .map(|a| AccountInfo {
                name: a.name,
                account_id: a.account_id,
                is_read_only: a.is_read_only,
                has_submission: a.has_submission,
            })
            .collect()
    }

    pub(crate) fn get_session_impl(&self, input: &AccountOnlyInput) -> AppResult<SessionInfo> {
        let session = self.registry.resolve(input.account.as_deref())?;
        Ok(SessionInfo {
            name: session.name().to_owned(),
            account_id: session.account_id().to_owned(),
            username: session.username().to_owned(),
            session_url: session.session_url().to_owned(),
            api_url: session.api_url().to_owned(),
            auth_scheme: session.auth_scheme().to_owned(),
            capabilities: session.capabilities().to_vec(),
            is_read_only: session.is_read_only(),
            has_submission: session.has_submission(),
        })
    }

    pub(crate) async fn list_mailboxes_impl(
        &self,
        input: &AccountOnlyInput,
    ) -> AppResult<Vec<MailboxInfo>> {
        let session = self.registry.resolve(input.account.as_deref())?;
        mail::list_mailboxes(session).await
    }

    pub(crate) async fn search_emails_impl(
        &self,
        input: &SearchEmailsInput,
    ) -> AppResult<SearchResult> {
        validate_search_input(input)?;
        let session = self.registry.resolve(input.account.as_deref())?;
        mail::search_emails(session, input).await
    }

    pub(crate) async fn get_email_impl(&self, input: &GetEmailInput) -> AppResult<EmailDetail> {
        validate_id(&input.email_id, "email_id")?;
        let body_max_chars = input.body_max_chars.unwrap_or(self.body_max_chars);
        validate_chars(
            body_max_chars,
            *BODY_MAX_CHARS_RANGE.start(),
            *BODY_MAX_CHARS_RANGE.end(),
            "body_max_chars",
        )?;
        let session = self.registry.resolve(input.account.as_deref())?;
        mail::get_email(session, &input.email_id, body_max_chars).await
    }

    pub(crate) async fn update_keywords_impl(
        &self,
        input: &UpdateEmailKeywordsInput,
    ) -> AppResult<UpdateResult> {
        validate_email_ids(&input.email_ids)?;
        if input.seen.is_none() && input.flagged.is_none() {
            return Err(AppError::invalid(
                "at least one of seen/flagged is required",
            ));
        }
        let session = self.registry.resolve(input.account.as_deref())?;
        mail::set_keywords(session, &input.email_ids, input.seen, input.flagged).await
    }

    pub(crate) async fn move_email_impl(&self, input: &MoveEmailInput) -> AppResult<UpdateResult> {
        validate_email_ids(&input.email_ids)?;
        validate_id(&input.mailbox_id, "mailbox_id")?;
        let session = self.registry.resolve(input.account.as_deref())?;
        mail::move_emails(session, &input.email_ids, &input.mailbox_id).await
    }

    pub(crate) async fn create_draft_impl(&self, input: &CreateDraftInput) -> AppResult<DraftResult> {
        validate_draft_input(input)?;
        let session = self.registry.resolve(input.account.as_deref())?;
        mail::create_draft(
            session,
            &DraftRequest {
                from: input.from.as_deref(),
                to: &input.to,
                cc: &input.cc,
                subject: &input.subject,
                body: &input.body,
            },
        )
        .await
    }

    pub(crate) async fn send_draft_impl(
        &self,
        input: &SendDraftInput,
    ) -> AppResult<SubmissionResult> {
        validate_id(&input.email_id, "email_id")?;
        if let Some(identity) = &input.identity_id {
            validate_id(identity, "identity_id")?;
        }
        let session = self.registry.resolve(input.account.as_deref())?;
        mail::send_draft(session, &input.email_id, input.identity_id.as_deref()).await
    }
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build a standardized MCP tool response envelope from business logic output
fn finalize_tool<T>(
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    match result {
        Ok((summary, data)) => Ok(Json(ToolEnvelope {
            summary,
            data,
            meta: Meta::now(duration_ms(started)),
        })),
        Err(e) => Err(e.to_error_data()),
    }
}

/// Validate a JMAP `Id` (RFC 8620 §1.2)
fn validate_id(value: &str, field: &str) -> AppResult<()> {
    if value.is_empty() || value.len() > 255 {
        return Err(AppError::InvalidInput(format!(
            "{field} must be 1..255 characters"
        )));
    }
    if !value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        return Err(AppError::InvalidInput(format!(
            "{field} must match [A-Za-z0-9_-]+"
        )));
    }
    Ok(())
}

fn validate_email_ids(ids: &[String]) -> AppResult<()> {
    if ids.is_empty() || ids.len() > MAX_EMAIL_IDS {
        return Err(AppError::InvalidInput(format!(
            "email_ids must contain 1..{MAX_EMAIL_IDS} ids"
        )));
    }
    ids.iter().try_for_each(|id| validate_id(id, "email_ids"))
}

/// Reject control characters in user-provided values
fn validate_no_controls(value: &str, field: &str) -> AppResult<()> {
    if value.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

/// Validate numeric value in range
fn validate_chars(value: usize, min: usize, max: usize, field: &str) -> AppResult<()> {
    if value < min || value > max {
        return Err(AppError::InvalidInput(format!(
            "{field} must be in range {min}..{max}"
        )));
    }
    Ok(())
}

/// Validate search text field bounds and characters
fn validate_search_text(input: &str) -> AppResult<()> {
    if input.is_empty() || input.len() > 256 {
        return Err(AppError::InvalidInput(
            "search text fields must be 1..256 chars".to_owned(),
        ));
    }
    validate_no_controls(input, "search text")
}

fn validate_search_input(input: &SearchEmailsInput) -> AppResult<()> {
    if input.limit == 0 || input.limit > MAX_SEARCH_LIMIT {
        return Err(AppError::InvalidInput(format!(
            "limit must be in range 1..{MAX_SEARCH_LIMIT}"
        )));
    }
    if let Some(mailbox) = &input.mailbox_id {
        validate_id(mailbox, "mailbox_id")?;
    }
    for text in [&input.text, &input.from, &input.to, &input.subject]
        .into_iter()
        .flatten()
    {
        validate_search_text(text)?;
    }
    let after = input.after.as_deref().map(parse_ymd).transpose()?;
    let before = input.before.as_deref().map(parse_ymd).transpose()?;
    if let (Some(after), Some(before)) = (after, before)
        && after >= before
    {
        return Err(AppError::InvalidInput(
            "after must be earlier than before".to_owned(),
        ));
    }
    Ok(())
}

/// Validate a bare address (`local@domain`)
fn validate_address(value: &str, field: &str) -> AppResult<()> {
    validate_no_controls(value, field)?;
    let valid = value.len() <= 254
        && !value.contains(char::is_whitespace)
        && value
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(AppError::InvalidInput(format!(
            "{field} contains invalid address '{value}'"
        )));
    }
    Ok(())
}

fn validate_draft_input(input: &CreateDraftInput) -> AppResult<()> {
    if input.to.is_empty() {
        return Err(AppError::invalid("to must contain at least one address"));
    }
    if input.to.len() + input.cc.len() > MAX_RECIPIENTS {
        return Err(AppError::InvalidInput(format!(
            "at most {MAX_RECIPIENTS} recipients are allowed"
        )));
    }
    if let Some(from) = &input.from {
        validate_address(from, "from")?;
    }
    input.to.iter().try_for_each(|a| validate_address(a, "to"))?;
    input.cc.iter().try_for_each(|a| validate_address(a, "cc"))?;
    if input.subject.len() > 998 {
        return Err(AppError::invalid("subject must be at most 998 bytes"));
    }
    validate_no_controls(&input.subject, "subject")?;
    if input.body.chars().count() > MAX_DRAFT_BODY_CHARS {
        return Err(AppError::InvalidInput(format!(
            "body must be at most {MAX_DRAFT_BODY_CHARS} characters"
        )));
    }
    Ok(())
}

/// Parse YYYY-MM-DD date string
fn parse_ymd(input: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map_err(|_| AppError::InvalidInput(format!("invalid date '{input}', expected YYYY-MM-DD")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{
        JmapMcpServer, validate_address, validate_email_ids, validate_id, validate_search_input,
        validate_search_text,
    };
    use crate::errors::AppError;
    use crate::models::{
        AccountOnlyInput, GetEmailInput, SearchEmailsInput, UpdateEmailKeywordsInput,
    };
    use crate::registry::tests::registry;
    use crate::session::tests::{FULL, descriptor};

    fn tool_names(server: &JmapMcpServer) -> Vec<String> {
        let mut names: Vec<String> = server
            .tool_router
            .list_all()
            .into_iter()
            .map(|t| t.name.to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn read_only_registry_exposes_only_read_tools() {
        let registry = registry(&["ro:tok"], vec![descriptor(&FULL, true)]).await;
        let server = JmapMcpServer::new(Arc::new(registry), 2_000);
        assert_eq!(
            tool_names(&server),
            [
                "get_email",
                "get_session",
                "list_accounts",
                "list_mailboxes",
                "search_emails"
            ]
        );
    }

    #[tokio::test]
    async fn writable_registry_without_submission_hides_send() {
        let caps = ["urn:ietf:params:jmap:core", "urn:ietf:params:jmap:mail"];
        let registry = registry(&["rw:tok"], vec![descriptor(&caps, false)]).await;
        let server = JmapMcpServer::new(Arc::new(registry), 2_000);
        let names = tool_names(&server);
        assert!(names.contains(&"create_draft".to_owned()));
        assert!(names.contains(&"move_email".to_owned()));
        assert!(names.contains(&"update_email_keywords".to_owned()));
        assert!(!names.contains(&"send_draft".to_owned()));
    }

    #[tokio::test]
    async fn mixed_registry_exposes_every_tool() {
        let registry = registry(
            &["rw:tok", "ro:tok"],
            vec![descriptor(&FULL, false), descriptor(&FULL, true)],
        )
        .await;
        let server = JmapMcpServer::new(Arc::new(registry), 2_000);
        assert_eq!(tool_names(&server).len(), 9);
    }

    #[tokio::test]
    async fn write_on_read_only_account_is_refused_per_call() {
        let registry = registry(
            &["rw:tok", "ro:tok"],
            vec![descriptor(&FULL, false), descriptor(&FULL, true)],
        )
        .await;
        let server = JmapMcpServer::new(Arc::new(registry), 2_000);
        let err = server
            .update_keywords_impl(&UpdateEmailKeywordsInput {
                account: Some("ro".to_owned()),
                email_ids: vec!["m1".to_owned()],
                seen: Some(true),
                flagged: None,
            })
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Permission(_)));
    }

    #[tokio::test]
    async fn get_session_reports_resolved_account() {
        let registry = registry(&["work:alice:pw"], vec![descriptor(&FULL, false)]).await;
        let server = JmapMcpServer::new(Arc::new(registry), 2_000);
        let info = server
            .get_session_impl(&AccountOnlyInput::default())
            .expect("default account");
        assert_eq!(info.name, "work");
        assert_eq!(info.account_id, "A1");
        assert_eq!(info.auth_scheme, "basic");
        assert_eq!(info.api_url, "https://mail.example.com/jmap/api/");

        let err = server
            .get_session_impl(&AccountOnlyInput {
                account: Some("missing".to_owned()),
            })
            .expect_err("must fail");
        assert!(err.to_string().contains("work"));
    }

    #[tokio::test]
    async fn smallest_configured_body_limit_passes_validation() {
        let registry = registry(&["rw:tok"], vec![descriptor(&FULL, false)]).await;
        let server = JmapMcpServer::new(Arc::new(registry), 100);
        let input = GetEmailInput {
            account: None,
            email_id: "m1".to_owned(),
            body_max_chars: None,
        };
        // the fake answers every request with the session descriptor
        let err = server.get_email_impl(&input).await.expect_err("no api");
        assert!(!matches!(err, AppError::InvalidInput(_)));

        let too_small = GetEmailInput {
            body_max_chars: Some(99),
            ..input
        };
        let err = server.get_email_impl(&too_small).await.expect_err("must fail");
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn rejects_control_chars_in_search_text() {
        let err = validate_search_text("hello\nworld").expect_err("must fail");
        assert!(err.to_string().contains("control characters"));
    }

    #[test]
    fn search_input_bounds() {
        let mut input = SearchEmailsInput {
            limit: 20,
            ..SearchEmailsInput::default()
        };
        validate_search_input(&input).expect("valid");

        input.limit = 0;
        assert!(validate_search_input(&input).is_err());

        input.limit = 10;
        input.after = Some("2026-03-01".to_owned());
        input.before = Some("2026-02-01".to_owned());
        assert!(validate_search_input(&input).is_err());
    }

    #[test]
    fn ids_reject_injection_like_values() {
        validate_id("M1a-b_c", "email_id").expect("valid id");
        assert!(validate_id("m1/../x", "email_id").is_err());
        assert!(validate_id("", "email_id").is_err());
        assert!(validate_email_ids(&[]).is_err());
    }

    #[test]
    fn addresses_need_local_part_and_domain() {
        validate_address("bob@example.com", "to").expect("valid");
        assert!(validate_address("bob", "to").is_err());
        assert!(validate_address("@example.com", "to").is_err());
        assert!(validate_address("bob@example.com\r\nBcc: x", "to").is_err());
    }
}
