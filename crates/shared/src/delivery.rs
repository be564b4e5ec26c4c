use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

use crate::briefing::InlineImage;
use crate::config::MailSettings;

/// Who receives a run's briefing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipients {
    pub to: Vec<String>,
    pub bcc: Vec<String>,
}

impl Recipients {
    /// Without `send_to_everyone` the briefing goes to the developer only,
    /// however long the distribution list is.
    pub fn resolve(developer: &str, distribution: &[String], send_to_everyone: bool) -> Self {
        let developer = developer.trim().to_string();
        if !send_to_everyone {
            return Self {
                to: vec![developer],
                bcc: Vec::new(),
            };
        }

        let mut seen = HashSet::new();
        seen.insert(developer.to_lowercase());
        let bcc = distribution
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .filter(|r| seen.insert(r.to_lowercase()))
            .map(str::to_string)
            .collect();

        Self {
            to: vec![developer],
            bcc,
        }
    }

    pub fn count(&self) -> usize {
        self.to.len() + self.bcc.len()
    }
}

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub subject: String,
    pub html: String,
    pub images: Vec<InlineImage>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail, recipients: &Recipients) -> Result<()>;
}

/// `multipart/related` message: the HTML body followed by its inline images
pub fn build_message(from: &Mailbox, email: &OutgoingEmail, recipients: &Recipients) -> Result<Message> {
    let mut builder = Message::builder().from(from.clone()).subject(email.subject.as_str());

    for to in &recipients.to {
        let mailbox: Mailbox = to
            .parse()
            .with_context(|| format!("Invalid recipient address: {}", to))?;
        builder = builder.to(mailbox);
    }
    for bcc in &recipients.bcc {
        let mailbox: Mailbox = bcc
            .parse()
            .with_context(|| format!("Invalid recipient address: {}", bcc))?;
        builder = builder.bcc(mailbox);
    }

    let mut related = MultiPart::related().singlepart(SinglePart::html(email.html.clone()));
    for image in &email.images {
        let content_type = ContentType::parse(&image.mime_type)
            .with_context(|| format!("Invalid image type: {}", image.mime_type))?;
        related = related.singlepart(
            Attachment::new_inline(image.content_id.clone()).body(image.bytes.clone(), content_type),
        );
    }

    builder.multipart(related).context("build email")
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &MailSettings, username: &str, password: &str) -> Result<Self> {
        let creds = Credentials::new(username.to_string(), password.to_string());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_host)
            .with_context(|| format!("Invalid SMTP host: {}", settings.smtp_host))?
            .port(settings.smtp_port)
            .credentials(creds)
            .timeout(Some(Duration::from_secs(settings.timeout_secs)))
            .build();

        let from = username
            .parse()
            .with_context(|| format!("Invalid sender address: {}", username))?;

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail, recipients: &Recipients) -> Result<()> {
        let message = build_message(&self.from, email, recipients)?;
        self.transport.send(message).await.context("send email")?;
        info!(recipients = recipients.count(), subject = %email.subject, "Email sent");
        Ok(())
    }
}
