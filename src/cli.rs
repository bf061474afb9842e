//! Command-line surface
//!
//! `serve` runs the MCP server (stdio by default, streamable HTTP with
//! `--http`). The remaining commands call the same tool implementations and
//! print one tab-separated line per record.

use std::io::Write;
use std::net::SocketAddr;

use axum::Router;
use axum::routing::get;
use clap::{Args, Parser, Subcommand};
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::models::{
    AccountInfo, AccountOnlyInput, CreateDraftInput, EmailAddress, EmailDetail, GetEmailInput,
    MailboxInfo, SearchEmailsInput, SearchResult, SendDraftInput,
};
use crate::server::JmapMcpServer;

#[derive(Parser, Debug)]
#[command(
    name = "jmap-mcp",
    version,
    about = "JMAP mail over MCP, plus a compact command line"
)]
pub struct Cli {
    /// Account name (defaults to the first configured account)
    #[arg(long, short, global = true)]
    pub account: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the MCP server (default)
    Serve(ServeArgs),
    /// List configured accounts
    Accounts,
    /// List mailboxes
    Mailboxes,
    /// Search emails, newest first
    Search(SearchArgs),
    /// Print one email
    Read(ReadArgs),
    /// Create a plain text draft
    Draft(DraftArgs),
    /// Send an existing draft
    Send(SendArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Serve streamable HTTP on this address instead of stdio
    #[arg(long)]
    pub http: Option<SocketAddr>,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Full-text query
    pub text: Option<String>,
    #[arg(long)]
    pub mailbox: Option<String>,
    #[arg(long)]
    pub from: Option<String>,
    #[arg(long)]
    pub to: Option<String>,
    #[arg(long)]
    pub subject: Option<String>,
    /// Only unread emails
    #[arg(long)]
    pub unread: bool,
    /// YYYY-MM-DD
    #[arg(long)]
    pub after: Option<String>,
    /// YYYY-MM-DD
    #[arg(long)]
    pub before: Option<String>,
    #[arg(long, default_value_t = 0)]
    pub position: u64,
    #[arg(long, short = 'n', default_value_t = 20)]
    pub limit: u64,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    pub email_id: String,
    /// Body truncation in characters
    #[arg(long)]
    pub max_chars: Option<usize>,
}

#[derive(Args, Debug)]
pub struct DraftArgs {
    #[arg(long, required = true)]
    pub to: Vec<String>,
    #[arg(long)]
    pub cc: Vec<String>,
    #[arg(long)]
    pub from: Option<String>,
    #[arg(long, short)]
    pub subject: String,
    #[arg(long, short)]
    pub body: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    pub email_id: String,
    #[arg(long)]
    pub identity: Option<String>,
}

/// Execute `command` against an already-built server
///
/// `--account` selects the target of mail commands; `serve` and `accounts`
/// span every account and reject it.
pub async fn run(server: JmapMcpServer, account: Option<String>, command: Command) -> AppResult<()> {
    reject_unused_account(&command, account.as_deref())?;
    let lines = match command {
        Command::Serve(args) => {
            return match args.http {
                Some(addr) => serve_http(server, addr).await,
                None => serve_stdio(server).await,
            };
        }
        Command::Accounts => format_accounts(&server.list_accounts_impl()),
        Command::Mailboxes => {
            format_mailboxes(&server.list_mailboxes_impl(&AccountOnlyInput { account }).await?)
        }
        Command::Search(args) => {
            let result = server
                .search_emails_impl(&SearchEmailsInput {
                    account,
                    mailbox_id: args.mailbox,
                    text: args.text,
                    from: args.from,
                    to: args.to,
                    subject: args.subject,
                    unread_only: args.unread,
                    after: args.after,
                    before: args.before,
                    position: args.position,
                    limit: args.limit,
                })
                .await?;
            if let Some(next) = result.next_position {
                eprintln!("more results: --position {next}");
            }
            format_search(&result)
        }
        Command::Read(args) => format_email(
            &server
                .get_email_impl(&GetEmailInput {
                    account,
                    email_id: args.email_id,
                    body_max_chars: args.max_chars,
                })
                .await?,
        ),
        Command::Draft(args) => {
            let draft = server
                .create_draft_impl(&CreateDraftInput {
                    account,
                    from: args.from,
                    to: args.to,
                    cc: args.cc,
                    subject: args.subject,
                    body: args.body,
                })
                .await?;
            vec![format!("{}\t{}", draft.email_id, draft.mailbox_id)]
        }
        Command::Send(args) => {
            let sent = server
                .send_draft_impl(&SendDraftInput {
                    account,
                    email_id: args.email_id,
                    identity_id: args.identity,
                })
                .await?;
            vec![format!("{}\t{}", sent.submission_id, sent.email_id)]
        }
    };

    let mut out = std::io::stdout().lock();
    for line in lines {
        writeln!(out, "{line}").map_err(|e| AppError::Internal(format!("stdout: {e}")))?;
    }
    Ok(())
}

fn reject_unused_account(command: &Command, account: Option<&str>) -> AppResult<()> {
    let name = match command {
        Command::Serve(_) => "serve",
        Command::Accounts => "accounts",
        _ => return Ok(()),
    };
    match account {
        Some(account) => Err(AppError::InvalidInput(format!(
            "--account {account} has no effect on '{name}', which covers every account"
        ))),
        None => Ok(()),
    }
}

/// Serve MCP over stdin/stdout until the client disconnects
async fn serve_stdio(server: JmapMcpServer) -> AppResult<()> {
    info!("serving MCP over stdio");
    let service = server
        .serve(stdio())
        .await
        .map_err(|e| AppError::Internal(format!("mcp initialization failed: {e}")))?;
    service
        .waiting()
        .await
        .map_err(|e| AppError::Internal(format!("mcp service failed: {e}")))?;
    Ok(())
}

/// Serve streamable HTTP MCP at `/mcp` until Ctrl-C
async fn serve_http(server: JmapMcpServer, addr: SocketAddr) -> AppResult<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Configuration(format!("cannot bind {addr}: {e}")))?;
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        trigger.cancel();
    });

    info!(%addr, "serving MCP over streamable HTTP");
    axum::serve(listener, http_router(server))
        .with_graceful_shutdown(async move { shutdown.cancelled_owned().await })
        .await
        .map_err(|e| AppError::Internal(format!("http server failed: {e}")))
}

fn http_router(server: JmapMcpServer) -> Router {
    let mcp = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );
    Router::new()
        .route("/health", get(health))
        .nest_service("/mcp", mcp)
}

async fn health() -> &'static str {
    "ok"
}

/// Make a value safe for one tab-separated field
fn field(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '\t' || c.is_control() { ' ' } else { c })
        .collect()
}

fn opt(value: Option<&str>) -> String {
    value.map_or_else(|| "-".to_owned(), field)
}

fn address(a: &EmailAddress) -> String {
    match &a.name {
        Some(name) if !name.is_empty() => field(&format!("{name} <{}>", a.email)),
        _ => field(&a.email),
    }
}

fn address_list(list: &[EmailAddress]) -> String {
    if list.is_empty() {
        return "-".to_owned();
    }
    list.iter().map(address).collect::<Vec<_>>().join(", ")
}

fn format_accounts(accounts: &[AccountInfo]) -> Vec<String> {
    accounts
        .iter()
        .enumerate()
        .map(|(i, a)| {
            format!(
                "{}{}\t{}\t{}\t{}",
                field(&a.name),
                if i == 0 { "*" } else { "" },
                field(&a.account_id),
                if a.is_read_only { "ro" } else { "rw" },
                if a.has_submission { "send" } else { "-" }
            )
        })
        .collect()
}

fn format_mailboxes(mailboxes: &[MailboxInfo]) -> Vec<String> {
    mailboxes
        .iter()
        .map(|m| {
            format!(
                "{}\t{}\t{}/{}\t{}",
                field(&m.id),
                opt(m.role.as_deref()),
                m.unread_emails,
                m.total_emails,
                field(&m.name)
            )
        })
        .collect()
}

fn format_search(result: &SearchResult) -> Vec<String> {
    result
        .emails
        .iter()
        .map(|e| {
            let unread = !e.keywords.iter().any(|k| k == "$seen");
            format!(
                "{}\t{}\t{}\t{}\t{}",
                field(&e.id),
                opt(e.received_at.as_deref()),
                if unread { "N" } else { " " },
                address_list(&e.from),
                opt(e.subject.as_deref())
            )
        })
        .collect()
}

fn format_email(email: &EmailDetail) -> Vec<String> {
    let mut lines = vec![
        format!("Id:\t{}", field(&email.id)),
        format!("Date:\t{}", opt(email.received_at.as_deref())),
        format!("From:\t{}", address_list(&email.from)),
        format!("To:\t{}", address_list(&email.to)),
    ];
    if !email.cc.is_empty() {
        lines.push(format!("Cc:\t{}", address_list(&email.cc)));
    }
    lines.push(format!("Subject:\t{}", opt(email.subject.as_deref())));
    lines.push(String::new());
    if let Some(body) = &email.body_text {
        lines.extend(body.lines().map(str::to_owned));
    }
    if email.body_truncated {
        lines.push("[truncated]".to_owned());
    }
    lines
}
