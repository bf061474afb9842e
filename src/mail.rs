//! JMAP mail operations
//!
//! Each function issues one method-call batch through an [`AccountSession`]
//! and maps the RFC 8621 wire objects onto the tool DTOs. Permission checks
//! happen here so both front-ends enforce them identically.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::jmap::Invocation;
use crate::models::{
    DraftResult, EmailAddress, EmailDetail, EmailSummary, MailboxInfo, SearchEmailsInput,
    SearchResult, SubmissionResult, UpdateResult,
};
use crate::session::AccountSession;

const SUMMARY_PROPERTIES: [&str; 9] = [
    "id",
    "threadId",
    "receivedAt",
    "from",
    "subject",
    "preview",
    "keywords",
    "mailboxIds",
    "hasAttachment",
];

const DETAIL_PROPERTIES: [&str; 13] = [
    "id",
    "threadId",
    "receivedAt",
    "from",
    "to",
    "cc",
    "subject",
    "keywords",
    "mailboxIds",
    "hasAttachment",
    "textBody",
    "bodyValues",
    "preview",
];

#[derive(Debug, Deserialize)]
struct GetResponse<T> {
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<String>,
    #[serde(default)]
    position: u64,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetResponse {
    #[serde(default)]
    created: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    updated: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    not_created: Option<BTreeMap<String, SetError>>,
    #[serde(default)]
    not_updated: Option<BTreeMap<String, SetError>>,
}

#[derive(Debug, Deserialize)]
struct SetError {
    #[serde(rename = "type")]
    error_type: String,
    #[serde(default)]
    description: Option<String>,
}

impl SetError {
    fn reason(&self) -> String {
        match &self.description {
            Some(d) => format!("{}: {d}", self.error_type),
            None => self.error_type.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMailbox {
    id: String,
    name: String,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    total_emails: u64,
    #[serde(default)]
    unread_emails: u64,
}

#[derive(Debug, Deserialize)]
struct WireAddress {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBodyPart {
    #[serde(default)]
    part_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBodyValue {
    value: String,
    #[serde(default)]
    is_truncated: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEmail {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    received_at: Option<String>,
    #[serde(default)]
    from: Option<Vec<WireAddress>>,
    #[serde(default)]
    to: Option<Vec<WireAddress>>,
    #[serde(default)]
    cc: Option<Vec<WireAddress>>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    preview: Option<String>,
    #[serde(default)]
    keywords: BTreeMap<String, bool>,
    #[serde(default)]
    mailbox_ids: BTreeMap<String, bool>,
    #[serde(default)]
    has_attachment: bool,
    #[serde(default)]
    text_body: Option<Vec<WireBodyPart>>,
    #[serde(default)]
    body_values: BTreeMap<String, WireBodyValue>,
}

impl WireEmail {
    fn into_summary(self) -> EmailSummary {
        EmailSummary {
            id: self.id,
            thread_id: self.thread_id,
            received_at: self.received_at,
            from: addresses(self.from),
            subject: self.subject,
            preview: self.preview,
            keywords: set_members(self.keywords),
            mailbox_ids: set_members(self.mailbox_ids),
            has_attachment: self.has_attachment,
        }
    }

    fn into_detail(mut self, body_max_chars: usize) -> EmailDetail {
        let mut truncated = false;
        let parts: Vec<String> = self
            .text_body
            .take()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| part.part_id)
            .filter_map(|id| self.body_values.remove(&id))
            .map(|value| {
                truncated |= value.is_truncated;
                value.value
            })
            .collect();
        let body_text = if parts.is_empty() {
            None
        } else {
            let joined = parts.join("\n");
            if joined.chars().count() > body_max_chars {
                truncated = true;
            }
            Some(truncate_chars(joined, body_max_chars))
        };
        EmailDetail {
            id: self.id,
            thread_id: self.thread_id,
            received_at: self.received_at,
            from: addresses(self.from),
            to: addresses(self.to),
            cc: addresses(self.cc),
            subject: self.subject,
            keywords: set_members(self.keywords),
            mailbox_ids: set_members(self.mailbox_ids),
            has_attachment: self.has_attachment,
            body_text,
            body_truncated: truncated,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireIdentity {
    id: String,
    #[serde(default)]
    email: String,
}

/// List all mailboxes of the account
pub async fn list_mailboxes(session: &AccountSession) -> AppResult<Vec<MailboxInfo>> {
    let responses = session
        .call(vec![Invocation::new(
            "Mailbox/get",
            json!({
                "accountId": session.account_id(),
                "ids": null,
                "properties": ["id", "name", "parentId", "role", "totalEmails", "unreadEmails"],
            }),
            "m0",
        )])
        .await?;
    let got: GetResponse<WireMailbox> = responses.take("Mailbox/get", "m0")?;
    Ok(got
        .list
        .into_iter()
        .map(|m| MailboxInfo {
            id: m.id,
            name: m.name,
            parent_id: m.parent_id,
            role: m.role,
            total_emails: m.total_emails,
            unread_emails: m.unread_emails,
        })
        .collect())
}

/// Query emails newest first and fetch summaries for the page
pub async fn search_emails(
    session: &AccountSession,
    input: &SearchEmailsInput,
) -> AppResult<SearchResult> {
    let filter = build_filter(input)?;
    let responses = session
        .call(vec![
            Invocation::new(
                "Email/query",
                json!({
                    "accountId": session.account_id(),
                    "filter": filter,
                    "sort": [{ "property": "receivedAt", "isAscending": false }],
                    "position": input.position,
                    "limit": input.limit,
                    "calculateTotal": true,
                }),
                "q0",
            ),
            Invocation::new(
                "Email/get",
                json!({
                    "accountId": session.account_id(),
                    "#ids": { "resultOf": "q0", "name": "Email/query", "path": "/ids" },
                    "properties": SUMMARY_PROPERTIES,
                }),
                "g0",
            ),
        ])
        .await?;
    let query: QueryResponse = responses.take("Email/query", "q0")?;
    let got: GetResponse<WireEmail> = responses.take("Email/get", "g0")?;

    // Email/get does not promise query order
    let mut by_id: BTreeMap<String, WireEmail> =
        got.list.into_iter().map(|e| (e.id.clone(), e)).collect();
    let emails: Vec<EmailSummary> = query
        .ids
        .iter()
        .filter_map(|id| by_id.remove(id))
        .map(WireEmail::into_summary)
        .collect();

    let end = query.position + query.ids.len() as u64;
    let next_position = match query.total {
        Some(total) if end < total => Some(end),
        Some(_) => None,
        None if query.ids.len() as u64 == input.limit => Some(end),
        None => None,
    };
    Ok(SearchResult {
        account: session.name().to_owned(),
        total: query.total,
        position: query.position,
        emails,
        next_position,
    })
}

/// Fetch one email with its text body
pub async fn get_email(
    session: &AccountSession,
    email_id: &str,
    body_max_chars: usize,
) -> AppResult<EmailDetail> {
    let responses = session
        .call(vec![Invocation::new(
            "Email/get",
            json!({
                "accountId": session.account_id(),
                "ids": [email_id],
                "properties": DETAIL_PROPERTIES,
                "fetchTextBodyValues": true,
                // bytes, not chars; exact cut happens locally
                "maxBodyValueBytes": body_max_chars.saturating_mul(4),
            }),
            "g0",
        )])
        .await?;
    let got: GetResponse<WireEmail> = responses.take("Email/get", "g0")?;
    got.list
        .into_iter()
        .next()
        .map(|e| e.into_detail(body_max_chars))
        .ok_or_else(|| AppError::NotFound(format!("email '{email_id}' not found")))
}

/// Set or clear `$seen` and `$flagged` on emails
pub async fn set_keywords(
    session: &AccountSession,
    email_ids: &[String],
    seen: Option<bool>,
    flagged: Option<bool>,
) -> AppResult<UpdateResult> {
    session.require_write()?;
    let mut patch = Map::new();
    if let Some(seen) = seen {
        patch.insert("keywords/$seen".to_owned(), keyword_value(seen));
    }
    if let Some(flagged) = flagged {
        patch.insert("keywords/$flagged".to_owned(), keyword_value(flagged));
    }
    if patch.is_empty() {
        return Err(AppError::invalid("at least one of seen/flagged is required"));
    }
    update_emails(session, email_ids, &Value::Object(patch)).await
}

/// Move emails so they belong to exactly `mailbox_id`
pub async fn move_emails(
    session: &AccountSession,
    email_ids: &[String],
    mailbox_id: &str,
) -> AppResult<UpdateResult> {
    session.require_write()?;
    update_emails(session, email_ids, &json!({ "mailboxIds": { mailbox_id: true } })).await
}

async fn update_emails(
    session: &AccountSession,
    email_ids: &[String],
    patch: &Value,
) -> AppResult<UpdateResult> {
    let update: Map<String, Value> = email_ids
        .iter()
        .map(|id| (id.clone(), patch.clone()))
        .collect();
    let responses = session
        .call(vec![Invocation::new(
            "Email/set",
            json!({ "accountId": session.account_id(), "update": update }),
            "s0",
        )])
        .await?;
    let set: SetResponse = responses.take("Email/set", "s0")?;
    Ok(UpdateResult {
        account: session.name().to_owned(),
        updated: set.updated.unwrap_or_default().into_keys().collect(),
        not_updated: set
            .not_updated
            .unwrap_or_default()
            .into_iter()
            .map(|(id, e)| (id, e.reason()))
            .collect(),
    })
}

/// Draft fields accepted by [`create_draft`]
#[derive(Debug, Clone)]
pub struct DraftRequest<'a> {
    pub from: Option<&'a str>,
    pub to: &'a [String],
    pub cc: &'a [String],
    pub subject: &'a str,
    pub body: &'a str,
}

/// Create a plain text draft in the account's Drafts mailbox
pub async fn create_draft(
    session: &AccountSession,
    draft: &DraftRequest<'_>,
) -> AppResult<DraftResult> {
    session.require_write()?;
    let from = match draft.from {
        Some(from) => from.to_owned(),
        None if session.username().contains('@') => session.username().to_owned(),
        None => {
            return Err(AppError::invalid(
                "from is required when the session username is not an address",
            ));
        }
    };
    let drafts = find_mailbox_by_role(session, "drafts").await?;

    let responses = session
        .call(vec![Invocation::new(
            "Email/set",
            json!({
                "accountId": session.account_id(),
                "create": {
                    "draft": {
                        "mailboxIds": { drafts.as_str(): true },
                        "keywords": { "$draft": true, "$seen": true },
                        "from": [{ "email": from }],
                        "to": address_list(draft.to),
                        "cc": address_list(draft.cc),
                        "subject": draft.subject,
                        "bodyValues": { "body": { "value": draft.body } },
                        "textBody": [{ "partId": "body", "type": "text/plain" }],
                    }
                }
            }),
            "c0",
        )])
        .await?;
    let set: SetResponse = responses.take("Email/set", "c0")?;
    let email_id = created_id(&set, "draft", "Email/set")?;
    debug!(account = session.name(), email_id = %email_id, "draft created");
    Ok(DraftResult {
        account: session.name().to_owned(),
        email_id,
        mailbox_id: drafts,
    })
}

/// Submit a draft and clear its `$draft` keyword on success
pub async fn send_draft(
    session: &AccountSession,
    email_id: &str,
    identity_id: Option<&str>,
) -> AppResult<SubmissionResult> {
    session.require_submission()?;
    let responses = session
        .call_with_submission(vec![
            Invocation::new(
                "Identity/get",
                json!({ "accountId": session.account_id(), "ids": null }),
                "i0",
            ),
            Invocation::new(
                "Email/get",
                json!({
                    "accountId": session.account_id(),
                    "ids": [email_id],
                    "properties": ["id", "from", "keywords"],
                }),
                "g0",
            ),
        ])
        .await?;
    let identities: GetResponse<WireIdentity> = responses.take("Identity/get", "i0")?;
    let emails: GetResponse<WireEmail> = responses.take("Email/get", "g0")?;
    let email = emails
        .list
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(format!("email '{email_id}' not found")))?;
    if !email.keywords.get("$draft").copied().unwrap_or(false) {
        return Err(AppError::invalid(format!("email '{email_id}' is not a draft")));
    }
    let sender = email
        .from
        .as_ref()
        .and_then(|f| f.first())
        .and_then(|a| a.email.as_deref());
    let identity = pick_identity(&identities.list, identity_id, sender)?;

    let responses = session
        .call_with_submission(vec![Invocation::new(
            "EmailSubmission/set",
            json!({
                "accountId": session.account_id(),
                "create": { "send": { "identityId": identity, "emailId": email_id } },
                "onSuccessUpdateEmail": { "#send": { "keywords/$draft": null } },
            }),
            "e0",
        )])
        .await?;
    let set: SetResponse = responses.take("EmailSubmission/set", "e0")?;
    let submission_id = created_id(&set, "send", "EmailSubmission/set")?;
    Ok(SubmissionResult {
        account: session.name().to_owned(),
        submission_id,
        email_id: email_id.to_owned(),
        identity_id: identity,
    })
}

async fn find_mailbox_by_role(session: &AccountSession, role: &str) -> AppResult<String> {
    let responses = session
        .call(vec![Invocation::new(
            "Mailbox/query",
            json!({ "accountId": session.account_id(), "filter": { "role": role } }),
            "r0",
        )])
        .await?;
    let query: QueryResponse = responses.take("Mailbox/query", "r0")?;
    query.ids.into_iter().next().ok_or_else(|| {
        AppError::NotFound(format!(
            "account '{}' has no mailbox with role '{role}'",
            session.name()
        ))
    })
}

/// Explicit id, else the identity matching the sender, else the first one
fn pick_identity(
    identities: &[WireIdentity],
    explicit: Option<&str>,
    sender: Option<&str>,
) -> AppResult<String> {
    if let Some(id) = explicit {
        return identities
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.id.clone())
            .ok_or_else(|| AppError::NotFound(format!("identity '{id}' not found")));
    }
    sender
        .and_then(|s| identities.iter().find(|i| i.email.eq_ignore_ascii_case(s)))
        .or_else(|| identities.first())
        .map(|i| i.id.clone())
        .ok_or_else(|| AppError::NotFound("account has no sending identity".to_owned()))
}

fn created_id(set: &SetResponse, creation_id: &str, method: &str) -> AppResult<String> {
    if let Some(err) = set.not_created.as_ref().and_then(|m| m.get(creation_id)) {
        return Err(AppError::Jmap {
            method: method.to_owned(),
            error_type: err.error_type.clone(),
            description: err.description.clone().unwrap_or_default(),
        });
    }
    set.created
        .as_ref()
        .and_then(|m| m.get(creation_id))
        .and_then(|c| c.get("id"))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| AppError::Connectivity(format!("{method} returned no created id")))
}

/// Build a JMAP `FilterCondition`; every set property must match
fn build_filter(input: &SearchEmailsInput) -> AppResult<Value> {
    let mut condition = Map::new();
    let mut put = |key: &str, value: Option<&String>| {
        if let Some(v) = value {
            condition.insert(key.to_owned(), Value::String(v.clone()));
        }
    };
    put("inMailbox", input.mailbox_id.as_ref());
    put("text", input.text.as_ref());
    put("from", input.from.as_ref());
    put("to", input.to.as_ref());
    put("subject", input.subject.as_ref());
    if input.unread_only {
        condition.insert("notKeyword".to_owned(), json!("$seen"));
    }
    if let Some(after) = &input.after {
        condition.insert("after".to_owned(), json!(utc_midnight(after)?));
    }
    if let Some(before) = &input.before {
        condition.insert("before".to_owned(), json!(utc_midnight(before)?));
    }
    if condition.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(Value::Object(condition))
    }
}

/// `YYYY-MM-DD` to a JMAP `UTCDate` at midnight
fn utc_midnight(input: &str) -> AppResult<String> {
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d").map_err(|_| {
        AppError::InvalidInput(format!("invalid date '{input}', expected YYYY-MM-DD"))
    })?;
    Ok(format!("{}T00:00:00Z", date.format("%Y-%m-%d")))
}

fn keyword_value(set: bool) -> Value {
    if set { Value::Bool(true) } else { Value::Null }
}

fn address_list(emails: &[String]) -> Value {
    emails.iter().map(|e| json!({ "email": e })).collect()
}

fn addresses(wire: Option<Vec<WireAddress>>) -> Vec<EmailAddress> {
    wire.unwrap_or_default()
        .into_iter()
        .filter_map(|a| {
            a.email.map(|email| EmailAddress {
                name: a.name,
                email,
            })
        })
        .collect()
}

fn set_members(set: BTreeMap<String, bool>) -> Vec<String> {
    set.into_iter().filter_map(|(k, v)| v.then_some(k)).collect()
}

/// Truncate to at most `max_chars` characters
pub fn truncate_chars(input: String, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input;
    }
    input.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::Method;
    use serde_json::{Value, json};

    use super::{
        DraftRequest, WireEmail, WireIdentity, build_filter, create_draft, pick_identity,
        search_emails, send_draft, set_keywords, truncate_chars,
    };
    use crate::errors::AppError;
    use crate::models::SearchEmailsInput;
    use crate::session::tests::{FULL, SESSION_URL, account, descriptor};
    use crate::session::{AccountSession, open_session};
    use crate::transport::fake::{FakeTransport, json_response};

    /// Session whose API endpoint answers each batch with `api(request_body)`
    async fn session_with(
        read_only: bool,
        api: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> (AccountSession, Arc<FakeTransport>) {
        let session_body = descriptor(&FULL, read_only);
        let fake = Arc::new(FakeTransport::new(move |request| {
            if request.method == Method::GET {
                return json_response(&session_body);
            }
            let body: Value =
                serde_json::from_slice(request.body.as_deref().expect("body")).expect("json");
            json_response(&api(&body))
        }));
        let session = open_session(SESSION_URL, &account("work:tok", None), fake.clone())
            .await
            .expect("session opens");
        (session, fake)
    }

    fn first_method(body: &Value) -> &str {
        body["methodCalls"][0][0].as_str().expect("method name")
    }

    fn posted(fake: &FakeTransport, index: usize) -> Value {
        let recorded = fake.recorded();
        serde_json::from_slice(recorded[index].body.as_deref().expect("body")).expect("json")
    }

    #[tokio::test]
    async fn search_keeps_query_order_and_pages() {
        let (session, fake) = session_with(false, |_| {
            json!({
                "methodResponses": [
                    ["Email/query", { "ids": ["m2", "m1"], "position": 0, "total": 5 }, "q0"],
                    ["Email/get", { "list": [
                        { "id": "m1", "subject": "older", "keywords": { "$seen": true } },
                        { "id": "m2", "subject": "newer" }
                    ], "notFound": [] }, "g0"]
                ],
                "sessionState": "s0"
            })
        })
        .await;

        let input = SearchEmailsInput {
            text: Some("invoice".to_owned()),
            limit: 2,
            ..SearchEmailsInput::default()
        };
        let result = search_emails(&session, &input).await.expect("search");
        assert_eq!(result.account, "work");
        assert_eq!(result.total, Some(5));
        assert_eq!(result.next_position, Some(2));
        let ids: Vec<&str> = result.emails.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["m2", "m1"]);

        assert_eq!(fake.recorded()[1].url, "https://mail.example.com/jmap/api/");
        let body = posted(&fake, 1);
        assert_eq!(body["methodCalls"][0][1]["filter"]["text"], "invoice");
        assert_eq!(body["methodCalls"][0][1]["sort"][0]["isAscending"], false);
        assert_eq!(body["methodCalls"][1][1]["#ids"]["resultOf"], "q0");
    }

    #[tokio::test]
    async fn draft_lands_in_drafts_mailbox_from_session_user() {
        let (session, fake) = session_with(false, |body| match first_method(body) {
            "Mailbox/query" => json!({
                "methodResponses": [["Mailbox/query", { "ids": ["d1"], "position": 0 }, "r0"]]
            }),
            _ => json!({
                "methodResponses": [["Email/set", { "created": { "draft": { "id": "e1" } } }, "c0"]]
            }),
        })
        .await;

        let to = vec!["bob@example.com".to_owned()];
        let draft = create_draft(
            &session,
            &DraftRequest {
                from: None,
                to: &to,
                cc: &[],
                subject: "Hi",
                body: "Hello Bob",
            },
        )
        .await
        .expect("draft");
        assert_eq!(draft.email_id, "e1");
        assert_eq!(draft.mailbox_id, "d1");

        let body = posted(&fake, 2);
        let create = &body["methodCalls"][0][1]["create"]["draft"];
        assert_eq!(create["mailboxIds"]["d1"], true);
        assert_eq!(create["keywords"]["$draft"], true);
        assert_eq!(create["from"][0]["email"], "alice@example.com");
        assert_eq!(create["bodyValues"]["body"]["value"], "Hello Bob");
    }

    #[tokio::test]
    async fn send_submits_with_matching_identity_and_clears_draft() {
        let (session, fake) = session_with(false, |body| match first_method(body) {
            "Identity/get" => json!({
                "methodResponses": [
                    ["Identity/get", { "list": [
                        { "id": "i1", "email": "other@example.com" },
                        { "id": "i2", "email": "alice@example.com" }
                    ] }, "i0"],
                    ["Email/get", { "list": [{
                        "id": "e1",
                        "from": [{ "email": "alice@example.com" }],
                        "keywords": { "$draft": true }
                    }] }, "g0"]
                ]
            }),
            _ => json!({
                "methodResponses": [
                    ["EmailSubmission/set", { "created": { "send": { "id": "s1" } } }, "e0"]
                ]
            }),
        })
        .await;

        let sent = send_draft(&session, "e1", None).await.expect("sent");
        assert_eq!(sent.submission_id, "s1");
        assert_eq!(sent.identity_id, "i2");

        let body = posted(&fake, 2);
        assert_eq!(body["using"][2], "urn:ietf:params:jmap:submission");
        let args = &body["methodCalls"][0][1];
        assert_eq!(args["create"]["send"]["identityId"], "i2");
        assert_eq!(
            args["onSuccessUpdateEmail"]["#send"]["keywords/$draft"],
            Value::Null
        );
    }

    #[tokio::test]
    async fn send_refuses_non_drafts() {
        let (session, _) = session_with(false, |_| {
            json!({
                "methodResponses": [
                    ["Identity/get", { "list": [{ "id": "i1", "email": "alice@example.com" }] }, "i0"],
                    ["Email/get", { "list": [{ "id": "e1", "keywords": { "$seen": true } }] }, "g0"]
                ]
            })
        })
        .await;
        let err = send_draft(&session, "e1", None).await.expect_err("must fail");
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn read_only_account_never_reaches_the_server_for_writes() {
        let (session, fake) = session_with(true, |_| json!({ "methodResponses": [] })).await;
        let err = set_keywords(&session, &["m1".to_owned()], Some(true), None)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Permission(_)));
        assert_eq!(fake.recorded().len(), 1);
    }

    #[test]
    fn truncates_unicode_by_character() {
        assert_eq!(truncate_chars("a😀b😀c".to_owned(), 4), "a😀b😀");
        assert_eq!(truncate_chars("short".to_owned(), 10), "short");
    }

    #[test]
    fn empty_search_has_null_filter() {
        let filter = build_filter(&SearchEmailsInput::default()).expect("valid");
        assert_eq!(filter, Value::Null);
    }

    #[test]
    fn filter_combines_conditions() {
        let input = SearchEmailsInput {
            mailbox_id: Some("mb1".to_owned()),
            from: Some("bob@example.com".to_owned()),
            unread_only: true,
            after: Some("2026-01-31".to_owned()),
            ..SearchEmailsInput::default()
        };
        let filter = build_filter(&input).expect("valid");
        assert_eq!(
            filter,
            json!({
                "inMailbox": "mb1",
                "from": "bob@example.com",
                "notKeyword": "$seen",
                "after": "2026-01-31T00:00:00Z",
            })
        );
    }

    #[test]
    fn filter_rejects_bad_dates() {
        let input = SearchEmailsInput {
            before: Some("31/01/2026".to_owned()),
            ..SearchEmailsInput::default()
        };
        assert!(build_filter(&input).is_err());
    }

    #[test]
    fn detail_joins_text_parts_and_marks_truncation() {
        let email: WireEmail = serde_json::from_value(json!({
            "id": "m1",
            "from": [{ "name": "Bob", "email": "bob@example.com" }],
            "to": null,
            "keywords": { "$seen": true, "$flagged": false },
            "mailboxIds": { "inbox": true },
            "textBody": [{ "partId": "1" }, { "partId": "2" }],
            "bodyValues": {
                "1": { "value": "hello", "isTruncated": false },
                "2": { "value": "world", "isTruncated": false }
            }
        }))
        .expect("decodes");
        let detail = email.into_detail(8);
        assert_eq!(detail.body_text.as_deref(), Some("hello\nwo"));
        assert!(detail.body_truncated);
        assert_eq!(detail.keywords, ["$seen"]);
        assert!(detail.to.is_empty());
        assert_eq!(detail.from[0].email, "bob@example.com");
    }

    #[test]
    fn identity_prefers_explicit_then_sender_then_first() {
        let identities = vec![
            WireIdentity {
                id: "i1".to_owned(),
                email: "first@example.com".to_owned(),
            },
            WireIdentity {
                id: "i2".to_owned(),
                email: "Alice@Example.com".to_owned(),
            },
        ];
        assert_eq!(
            pick_identity(&identities, Some("i1"), Some("alice@example.com")).expect("found"),
            "i1"
        );
        assert_eq!(
            pick_identity(&identities, None, Some("alice@example.com")).expect("found"),
            "i2"
        );
        assert_eq!(pick_identity(&identities, None, None).expect("found"), "i1");
        assert!(pick_identity(&identities, Some("zz"), None).is_err());
        assert!(pick_identity(&[], None, None).is_err());
    }
}
