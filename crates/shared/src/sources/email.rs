use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use mail_parser::MessageParser;
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

use crate::config::{MailSettings, MailboxFilter};
use crate::error::SourceError;
use crate::models::{ContentItem, SourceType};
use crate::window::{eastern_today, TimeWindow};

static LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"'\)\]]+"#).expect("link regex"));

const SEPARATOR_CHARS: [char; 5] = ['-', '=', '*', '_', '─'];

/// One message as returned by the mailbox, before parsing
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    /// Server-side received time (IMAP INTERNALDATE)
    pub received_at: Option<DateTime<Utc>>,
    pub raw: Vec<u8>,
}

#[async_trait]
pub trait MailboxClient: Send + Sync {
    /// Messages matching `filter` received on or after `since`, in mailbox order.
    async fn fetch_messages(
        &self,
        filter: &MailboxFilter,
        since: NaiveDate,
    ) -> Result<Vec<RawMessage>, SourceError>;
}

/// Read matching messages and split them into items received inside `window`.
pub async fn fetch_email(
    client: &dyn MailboxClient,
    filter: &MailboxFilter,
    window: &TimeWindow,
) -> Result<Vec<ContentItem>, SourceError> {
    // IMAP SINCE has day granularity in the server's zone; widen by a day and filter exactly below
    let since = eastern_today(window.start()) - Duration::days(1);
    let messages = client.fetch_messages(filter, since).await?;
    let scanned = messages.len();

    let mut items = Vec::new();
    for message in &messages {
        match parse_message(message, filter, window) {
            Ok(extracted) => items.extend(extracted),
            Err(e) => warn!(source = %filter.name, uid = message.uid, error = %e, "Skipping message"),
        }
    }

    info!(source = %filter.name, scanned, items = items.len(), "Mailbox collected");
    Ok(items)
}

/// Turn one raw message into content items; empty when it falls outside `window`.
pub fn parse_message(
    message: &RawMessage,
    filter: &MailboxFilter,
    window: &TimeWindow,
) -> Result<Vec<ContentItem>, SourceError> {
    let parsed = MessageParser::default()
        .parse(&message.raw)
        .ok_or_else(|| SourceError::Parse("Failed to parse email".to_string()))?;

    let received_at = message
        .received_at
        .or_else(|| {
            parsed
                .date()
                .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        })
        .ok_or_else(|| SourceError::Parse("Message has no usable date".to_string()))?;

    if !window.contains(received_at) {
        return Ok(Vec::new());
    }

    let mut subject = parsed.subject().unwrap_or("(No Subject)").trim().to_string();
    if let Some(prefix) = filter.strip_subject_prefix.as_deref() {
        subject = subject.replacen(prefix, "", 1).trim().to_string();
    }

    let sender = parsed
        .from()
        .and_then(|addrs| addrs.first())
        .and_then(|addr| {
            addr.name
                .as_ref()
                .or(addr.address.as_ref())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    let body = parsed
        .body_text(0)
        .map(|text| text.into_owned())
        .unwrap_or_default();

    let key = match parsed.message_id() {
        Some(id) => format!("mid:{}", id.trim_matches(|c| c == '<' || c == '>')),
        None => format!("imap:{};UID={}", filter.mailbox, message.uid),
    };

    let blocks = split_stories(strip_signature(&body));
    let single = blocks.len() <= 1;

    // Keyed by message; the same masthead link shows up in unrelated messages
    let mut items = Vec::new();
    if single {
        let text = blocks.into_iter().next().unwrap_or_default();
        let link = first_link(&text);
        items.extend(
            ContentItem::new(
                subject.clone(),
                key.clone(),
                received_at,
                text,
                filter.name.as_str(),
                SourceType::Email,
            )
            .map(|item| item.with_email(sender.clone(), subject.clone()).with_link(link)),
        );
    } else {
        for (i, block) in blocks.into_iter().enumerate() {
            let title = block_title(&block);
            let link = first_link(&block);
            items.extend(
                ContentItem::new(
                    title,
                    format!("{}#{}", key, i + 1),
                    received_at,
                    block,
                    filter.name.as_str(),
                    SourceType::Email,
                )
                .map(|item| item.with_email(sender.clone(), subject.clone()).with_link(link)),
            );
        }
    }

    debug!(source = %filter.name, uid = message.uid, %subject, items = items.len(), "Parsed message");

    Ok(items)
}

fn is_separator(line: &str) -> bool {
    let line = line.trim();
    line.chars().count() >= 3
        && SEPARATOR_CHARS
            .iter()
            .any(|sep| line.chars().all(|c| c == *sep))
}

/// Drop everything after an RFC 3676 signature delimiter (`-- `).
fn strip_signature(body: &str) -> &str {
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "-- " || line.trim() == "--" {
            return &body[..offset];
        }
        offset += line.len();
    }
    body
}

/// Split a message body into stories on separator lines (`---`, `===`, `───`, ...).
pub fn split_stories(body: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines() {
        if is_separator(line) {
            blocks.push(current.join("\n"));
            current.clear();
        } else {
            current.push(line);
        }
    }
    blocks.push(current.join("\n"));

    blocks
        .into_iter()
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .collect()
}

fn block_title(block: &str) -> String {
    block
        .lines()
        .map(|line| line.trim().trim_matches(|c| c == '#' || c == '*').trim())
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn first_link(text: &str) -> Option<String> {
    LINK.find(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':']).to_string())
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// IMAP SEARCH criteria for a mailbox filter
pub fn search_query(filter: &MailboxFilter, since: NaiveDate) -> String {
    let mut query = format!("SINCE {}", since.format("%d-%b-%Y"));
    if let Some(address) = filter.address.as_deref() {
        let address = quote(address);
        query.push_str(&format!(" OR TO {} FROM {}", address, address));
    }
    if let Some(subject) = filter.subject.as_deref() {
        query.push_str(&format!(" SUBJECT {}", quote(subject)));
    }
    query
}

/// IMAP over TLS, run on a blocking thread with socket timeouts
#[derive(Clone)]
pub struct ImapMailbox {
    host: String,
    port: u16,
    username: String,
    password: String,
    timeout: std::time::Duration,
}

impl ImapMailbox {
    pub fn new(settings: &MailSettings, username: &str, password: &str) -> Self {
        Self {
            host: settings.imap_host.clone(),
            port: settings.imap_port,
            username: username.to_string(),
            password: password.to_string(),
            timeout: std::time::Duration::from_secs(settings.timeout_secs),
        }
    }

    fn fetch_blocking(&self, mailbox: &str, query: &str) -> Result<Vec<RawMessage>, SourceError> {
        let mailbox_err = |e: imap::Error| SourceError::Mailbox(e.to_string());

        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| SourceError::Mailbox(format!("Failed to resolve {}: {}", self.host, e)))?
            .next()
            .ok_or_else(|| SourceError::Mailbox(format!("No address for {}", self.host)))?;

        let tcp = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| SourceError::Mailbox(format!("Failed to connect: {}", e)))?;
        tcp.set_read_timeout(Some(self.timeout))
            .and_then(|_| tcp.set_write_timeout(Some(self.timeout)))
            .map_err(|e| SourceError::Mailbox(e.to_string()))?;

        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| SourceError::Mailbox(e.to_string()))?;
        let stream = tls
            .connect(&self.host, tcp)
            .map_err(|e| SourceError::Mailbox(format!("TLS handshake failed: {}", e)))?;

        let mut client = imap::Client::new(stream);
        client.read_greeting().map_err(mailbox_err)?;

        let mut session = client
            .login(&self.username, &self.password)
            .map_err(|(e, _)| SourceError::Auth(e.to_string()))?;

        session.select(mailbox).map_err(mailbox_err)?;

        let mut uids: Vec<u32> = session.uid_search(query).map_err(mailbox_err)?.into_iter().collect();
        uids.sort_unstable();
        debug!(mailbox, query, matches = uids.len(), "IMAP search");

        let mut messages = Vec::new();
        if !uids.is_empty() {
            let set = uids
                .iter()
                .map(|uid| uid.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let fetched = session
                .uid_fetch(&set, "(UID INTERNALDATE RFC822)")
                .map_err(mailbox_err)?;

            for fetch in fetched.iter() {
                let Some(raw) = fetch.body() else {
                    continue;
                };
                messages.push(RawMessage {
                    uid: fetch.uid.unwrap_or(0),
                    received_at: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
                    raw: raw.to_vec(),
                });
            }
        }

        // Logout failures do not invalidate what was already read
        if let Err(e) = session.logout() {
            debug!(error = %e, "IMAP logout failed");
        }

        messages.sort_by_key(|m| m.uid);
        Ok(messages)
    }
}

#[async_trait]
impl MailboxClient for ImapMailbox {
    async fn fetch_messages(
        &self,
        filter: &MailboxFilter,
        since: NaiveDate,
    ) -> Result<Vec<RawMessage>, SourceError> {
        let query = search_query(filter, since);
        let mailbox = filter.mailbox.clone();
        let this = self.clone();

        tokio::task::spawn_blocking(move || this.fetch_blocking(&mailbox, &query))
            .await
            .map_err(|e| SourceError::Mailbox(format!("IMAP task failed: {}", e)))?
    }
}
