//! In-memory collaborators for scenario tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use shared::config::{
    MailboxFilter, Recency, RssFeed, SectionConfig, SectionKind, SectionLimits, SitemapSite,
    SourceDescriptor, StyleSettings,
};
use shared::{
    ContentItem, MailboxClient, Mailer, OutgoingEmail, PageFetcher, RawMessage, Recipients,
    SectionResult, SectionSummarizer, SourceError, SummaryError,
};
use shared::summarizer::ArticleBullet;
use std::collections::HashMap;
use std::sync::Mutex;

/// Wednesday 2026-02-04 07:00 EST; the window is Tue 06:00 to Wed 06:00 Eastern.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 4, 12, 0, 0).unwrap()
}

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, day, hour, 0, 0).unwrap()
}

pub struct MapFetcher(pub HashMap<String, String>);

impl MapFetcher {
    pub fn new(pages: &[(&str, String)]) -> Self {
        Self(
            pages
                .iter()
                .map(|(url, body)| (url.to_string(), body.clone()))
                .collect(),
        )
    }
}

#[async_trait]
impl PageFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> Result<String, SourceError> {
        self.0.get(url).cloned().ok_or_else(|| SourceError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

pub struct EmptyMailbox;

#[async_trait]
impl MailboxClient for EmptyMailbox {
    async fn fetch_messages(
        &self,
        _filter: &MailboxFilter,
        _since: NaiveDate,
    ) -> Result<Vec<RawMessage>, SourceError> {
        Ok(Vec::new())
    }
}

/// Cites the first item of every section, failing those named in `fail`.
pub struct FakeSummarizer {
    pub fail: Vec<String>,
}

#[async_trait]
impl SectionSummarizer for FakeSummarizer {
    async fn summarize(
        &self,
        section: &SectionConfig,
        items: &[ContentItem],
        _style: &StyleSettings,
    ) -> Result<SectionResult, SummaryError> {
        if self.fail.contains(&section.name) {
            return Err(SummaryError::Validation(
                "bullet 1 cites unknown url".to_string(),
            ));
        }
        let first = &items[0];
        Ok(SectionResult::Articles(vec![ArticleBullet {
            headline: first.title.clone(),
            one_sentence_summary: format!("Summary of {}.", first.title),
            source_name: first.source_name.clone(),
            url: first.url.clone(),
        }]))
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(OutgoingEmail, Recipients)>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<(OutgoingEmail, Recipients)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail, recipients: &Recipients) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((email.clone(), recipients.clone()));
        Ok(())
    }
}

pub struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _email: &OutgoingEmail, _recipients: &Recipients) -> anyhow::Result<()> {
        anyhow::bail!("535 authentication failed")
    }
}

pub fn rss_item(title: &str, link: &str, published: DateTime<Utc>, body: &str) -> String {
    format!(
        "<item><title>{}</title><link>{}</link><pubDate>{}</pubDate><description>{}</description></item>",
        title,
        link,
        published.to_rfc2822(),
        body
    )
}

pub fn rss(items: &[String]) -> String {
    format!(
        "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel><title>Feed</title>\
         <link>https://example.com</link><description>d</description>{}</channel></rss>",
        items.join("")
    )
}

pub fn urlset(entries: &[(&str, &str)]) -> String {
    let urls: String = entries
        .iter()
        .map(|(loc, lastmod)| format!("<url><loc>{}</loc><lastmod>{}</lastmod></url>", loc, lastmod))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">{}</urlset>",
        urls
    )
}

pub fn article_page(title: &str, body: &str) -> String {
    format!(
        "<html><head><title>{0} | Site</title></head><body><nav>Menu</nav>\
         <article><h1>{0}</h1><p>{1}</p></article></body></html>",
        title, body
    )
}

pub fn rss_source(name: &str, url: &str) -> SourceDescriptor {
    SourceDescriptor::Rss(RssFeed::new(name, url))
}

pub fn sitemap_source(name: &str, url: &str) -> SourceDescriptor {
    SourceDescriptor::Sitemap(SitemapSite {
        name: name.to_string(),
        url: url.to_string(),
        include_prefix: None,
        recency: Recency::LastmodThenUrl,
        title_selector: None,
        body_selector: None,
    })
}

pub fn email_source(name: &str, address: &str) -> SourceDescriptor {
    SourceDescriptor::Email(MailboxFilter {
        name: name.to_string(),
        address: Some(address.to_string()),
        subject: None,
        mailbox: "INBOX".to_string(),
        strip_subject_prefix: None,
    })
}

pub fn section(name: &str, sources: Vec<SourceDescriptor>) -> SectionConfig {
    SectionConfig {
        name: name.to_string(),
        kind: SectionKind::Articles,
        prompt: String::new(),
        sources,
        limits: SectionLimits::default(),
    }
}
