use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::config::{SectionConfig, SectionKind, StyleSettings};
use crate::error::SummaryError;
use crate::extractor::truncate_chars;
use crate::models::ContentItem;

/// Rough token estimate used for prompt budgeting
const CHARS_PER_TOKEN: usize = 4;

const BAR: &str = "================================================================================";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleBullet {
    pub headline: String,
    pub one_sentence_summary: String,
    pub source_name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailBullet {
    pub headline: String,
    pub one_sentence_summary: String,
    pub sender: String,
    pub subject: String,
}

/// Validated model output for one section
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "bullet_points", rename_all = "lowercase")]
pub enum SectionResult {
    Articles(Vec<ArticleBullet>),
    Emails(Vec<EmailBullet>),
}

impl SectionResult {
    pub fn len(&self) -> usize {
        match self {
            SectionResult::Articles(b) => b.len(),
            SectionResult::Emails(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Headline and summary of the first bullet
    pub fn lead(&self) -> Option<(&str, &str)> {
        match self {
            SectionResult::Articles(b) => b
                .first()
                .map(|b| (b.headline.as_str(), b.one_sentence_summary.as_str())),
            SectionResult::Emails(b) => b
                .first()
                .map(|b| (b.headline.as_str(), b.one_sentence_summary.as_str())),
        }
    }
}

#[async_trait]
pub trait SectionSummarizer: Send + Sync {
    async fn summarize(
        &self,
        section: &SectionConfig,
        items: &[ContentItem],
        style: &StyleSettings,
    ) -> Result<SectionResult, SummaryError>;
}

#[derive(Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    text: String,
}

pub struct ClaudeSummarizer {
    client: Client,
    api_key: String,
    model: String,
    semaphore: Arc<Semaphore>,
}

impl ClaudeSummarizer {
    pub fn new(api_key: String, style: &StyleSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(style.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        // Keep concurrency low to stay under the per-minute token limit
        let semaphore = Arc::new(Semaphore::new(2));

        Ok(Self {
            client,
            api_key,
            model: style.model.clone(),
            semaphore,
        })
    }

    async fn complete(&self, system: String, user: String) -> Result<String, SummaryError> {
        let request = ClaudeRequest {
            model: self.model.clone(),
            max_tokens: 2048,
            system,
            messages: vec![Message {
                role: "user".to_string(),
                content: user,
            }],
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(timeout_or_request)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            return Err(SummaryError::Api(format!("{}: {}", status, error_text)));
        }

        let claude_response = response
            .json::<ClaudeResponse>()
            .await
            .map_err(timeout_or_request)?;

        Ok(claude_response
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

fn timeout_or_request(e: reqwest::Error) -> SummaryError {
    if e.is_timeout() {
        SummaryError::Timeout
    } else {
        SummaryError::Request(e)
    }
}

#[async_trait]
impl SectionSummarizer for ClaudeSummarizer {
    async fn summarize(
        &self,
        section: &SectionConfig,
        items: &[ContentItem],
        style: &StyleSettings,
    ) -> Result<SectionResult, SummaryError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| SummaryError::Api(e.to_string()))?;

        let system = system_prompt(section, style);
        let budget = (style.max_prompt_tokens * CHARS_PER_TOKEN).saturating_sub(system.len());
        let (user, included) = user_content(items, section.kind, budget);

        info!(
            section = %section.name,
            items = included,
            tokens = (system.len() + user.len()) / CHARS_PER_TOKEN,
            "Summarizing section"
        );
        info!(
            target: crate::logging::PROMPT_TARGET,
            "\n{BAR}\nPROMPT FOR {}\n{BAR}\nSYSTEM: {}\n\nUSER: {}\n{BAR}",
            section.name, system, user
        );

        let text = self.complete(system, user).await?;

        info!(
            target: crate::logging::PROMPT_TARGET,
            "\n{BAR}\nRESPONSE FOR {}\n{BAR}\n{}\n{BAR}",
            section.name, text
        );

        let result = parse_response(&text, section.kind)?;
        validate(&result, items, style.bullets_per_section)?;
        Ok(result)
    }
}

/// Instructions sent as the system prompt for a section
pub fn system_prompt(section: &SectionConfig, style: &StyleSettings) -> String {
    let n = style.bullets_per_section;
    let keys = match section.kind {
        SectionKind::Articles => "'headline', 'one_sentence_summary', 'source_name' and 'url'",
        SectionKind::Emails => "'headline', 'one_sentence_summary', 'sender' and 'subject'",
    };
    let provenance = match section.kind {
        SectionKind::Articles => {
            "The 'source_name' and 'url' values must be copied exactly from the content item \
             that provided the information."
        }
        SectionKind::Emails => {
            "The 'sender' and 'subject' values must be copied exactly from the email that \
             provided the information."
        }
    };

    format!(
        "{prompt}\n\n\
         The reader is {reader}\n\
         Tone: {tone}\n\n\
         Give me the {n} most important bullet points from the content provided between \
         <content> tags. Use at most {n} bullet points and at least one, ordered by importance. \
         The 'headline' is a title-case headline that captures the main point. The \
         'one_sentence_summary' is a one-sentence summary of it. {provenance}\n\n\
         Respond with JSON only, with no text before or after it, in the form \
         {{\"bullet_points\": [...]}} where each element is an object with the keys {keys}.",
        prompt = section.prompt.trim(),
        reader = style.reader_profile.trim(),
        tone = style.tone.trim(),
        n = n,
        provenance = provenance,
        keys = keys,
    )
}

#[derive(Serialize)]
struct ArticlePayload<'a> {
    source_name: &'a str,
    url: &'a str,
    title: &'a str,
    article: &'a str,
}

#[derive(Serialize)]
struct EmailPayload<'a> {
    source_name: &'a str,
    sender: &'a str,
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    link: Option<&'a str>,
    body: &'a str,
}

fn item_json(item: &ContentItem, body: &str, kind: SectionKind) -> String {
    let result = match (kind, &item.email) {
        (SectionKind::Emails, Some(origin)) => serde_json::to_string(&EmailPayload {
            source_name: &item.source_name,
            sender: &origin.sender,
            subject: &origin.subject,
            link: origin.link.as_deref(),
            body,
        }),
        (SectionKind::Emails, None) => serde_json::to_string(&EmailPayload {
            source_name: &item.source_name,
            sender: &item.source_name,
            subject: &item.title,
            link: None,
            body,
        }),
        (SectionKind::Articles, _) => serde_json::to_string(&ArticlePayload {
            source_name: &item.source_name,
            url: &item.url,
            title: &item.title,
            article: body,
        }),
    };
    result.unwrap_or_default()
}

/// `<content>[...]</content>` holding as many items as fit in `budget_chars`.
///
/// Returns the content and how many items it includes. The first item is
/// always included, with its body shortened when it alone exceeds the budget.
pub fn user_content(items: &[ContentItem], kind: SectionKind, budget_chars: usize) -> (String, usize) {
    const WRAPPER: usize = "<content>[]</content>".len();

    let mut parts: Vec<String> = Vec::new();
    let mut used = WRAPPER;

    for item in items {
        let json = item_json(item, &item.body, kind);
        let cost = json.len() + usize::from(!parts.is_empty());

        if used + cost <= budget_chars {
            used += cost;
            parts.push(json);
            continue;
        }

        if parts.is_empty() {
            let without_body = item_json(item, "", kind).len();
            let room = budget_chars.saturating_sub(used + without_body);
            parts.push(item_json(item, truncate_chars(&item.body, room), kind));
        }
        debug!(included = parts.len(), total = items.len(), "Prompt budget reached");
        break;
    }

    let included = parts.len();
    (format!("<content>[{}]</content>", parts.join(",")), included)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload<T> {
    Wrapped { bullet_points: Vec<T> },
    Bare(Vec<T>),
}

impl<T> Payload<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Payload::Wrapped { bullet_points } => bullet_points,
            Payload::Bare(v) => v,
        }
    }
}

/// Places a reply's JSON might start: fenced blocks (last first), then every
/// `{` or `[` in order. Prose around the JSON can contain brackets too.
fn json_candidates(text: &str) -> Vec<&str> {
    let fenced = text.split("```").skip(1).step_by(2).map(|block| {
        match block.split_once('\n') {
            Some((tag, rest)) if tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) => rest,
            _ => block,
        }
    });
    let mut candidates: Vec<&str> = fenced.collect();
    candidates.reverse();
    candidates.extend(text.match_indices(['{', '[']).map(|(i, _)| &text[i..]));
    candidates
}

fn parse_list<T: DeserializeOwned>(text: &str) -> Result<Vec<T>, SummaryError> {
    let mut first_error = None;
    for candidate in json_candidates(text) {
        // Parse one value and ignore whatever prose follows it
        let mut values = serde_json::Deserializer::from_str(candidate).into_iter::<Payload<T>>();
        match values.next() {
            Some(Ok(payload)) => return Ok(payload.into_vec()),
            Some(Err(e)) => {
                first_error.get_or_insert(e);
            }
            None => {}
        }
    }

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(serde_json::from_str::<Payload<T>>(text.trim())?.into_vec()),
    }
}

/// Deserialize a model reply into the result shape for `kind`.
pub fn parse_response(text: &str, kind: SectionKind) -> Result<SectionResult, SummaryError> {
    Ok(match kind {
        SectionKind::Articles => SectionResult::Articles(parse_list(text)?),
        SectionKind::Emails => SectionResult::Emails(parse_list(text)?),
    })
}

fn require(field: &str, value: &str, index: usize) -> Result<(), SummaryError> {
    if value.trim().is_empty() {
        return Err(SummaryError::Validation(format!(
            "bullet {} has an empty {}",
            index + 1,
            field
        )));
    }
    Ok(())
}

/// Check a parsed result against the items it was generated from.
pub fn validate(
    result: &SectionResult,
    items: &[ContentItem],
    max_bullets: usize,
) -> Result<(), SummaryError> {
    let count = result.len();
    if count == 0 || count > max_bullets {
        return Err(SummaryError::Validation(format!(
            "expected 1 to {} bullet points, got {}",
            max_bullets, count
        )));
    }

    match result {
        SectionResult::Articles(bullets) => {
            let urls: HashSet<&str> = items.iter().map(|i| i.url.as_str()).collect();
            for (i, b) in bullets.iter().enumerate() {
                require("headline", &b.headline, i)?;
                require("one_sentence_summary", &b.one_sentence_summary, i)?;
                require("source_name", &b.source_name, i)?;
                require("url", &b.url, i)?;
                if !urls.contains(b.url.trim()) {
                    return Err(SummaryError::Validation(format!(
                        "bullet {} cites unknown url {}",
                        i + 1,
                        b.url
                    )));
                }
            }
        }
        SectionResult::Emails(bullets) => {
            let subjects: HashSet<&str> = items
                .iter()
                .map(|i| match &i.email {
                    Some(origin) => origin.subject.as_str(),
                    None => i.title.as_str(),
                })
                .collect();
            for (i, b) in bullets.iter().enumerate() {
                require("headline", &b.headline, i)?;
                require("one_sentence_summary", &b.one_sentence_summary, i)?;
                require("sender", &b.sender, i)?;
                require("subject", &b.subject, i)?;
                if !subjects.contains(b.subject.trim()) {
                    return Err(SummaryError::Validation(format!(
                        "bullet {} cites unknown subject {:?}",
                        i + 1,
                        b.subject
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SectionLimits;
    use crate::models::SourceType;
    use chrono::{TimeZone, Utc};

    fn article(url: &str, body: &str) -> ContentItem {
        ContentItem::new(
            "Title",
            url,
            Utc.with_ymd_and_hms(2026, 2, 3, 12, 0, 0).unwrap(),
            body,
            "Vegconomist",
            SourceType::Rss,
        )
        .unwrap()
    }

    fn email(subject: &str) -> ContentItem {
        ContentItem::new(
            subject,
            "mid:x@y#1",
            Utc.with_ymd_and_hms(2026, 2, 3, 12, 0, 0).unwrap(),
            "Body",
            "FAST",
            SourceType::Email,
        )
        .unwrap()
        .with_email("Ana", subject)
    }

    fn section(kind: SectionKind) -> SectionConfig {
        SectionConfig {
            name: "Alternative Protein".to_string(),
            kind,
            prompt: "Focus on funding rounds.".to_string(),
            sources: Vec::new(),
            limits: SectionLimits::default(),
        }
    }

    fn bullet(url: &str) -> ArticleBullet {
        ArticleBullet {
            headline: "Big Round".to_string(),
            one_sentence_summary: "A startup raised money.".to_string(),
            source_name: "Vegconomist".to_string(),
            url: url.to_string(),
        }
    }

    // ==================== Prompt Tests ====================

    #[test]
    fn test_system_prompt_mentions_style_and_keys() {
        let style = StyleSettings::default();
        let prompt = system_prompt(&section(SectionKind::Emails), &style);
        assert!(prompt.starts_with("Focus on funding rounds."));
        assert!(prompt.contains("3 most important bullet points"));
        assert!(prompt.contains("'sender' and 'subject'"));
        assert!(prompt.contains(style.tone.trim()));
    }

    #[test]
    fn test_user_content_respects_budget() {
        let items = vec![
            article("https://a.com/1", &"a".repeat(100)),
            article("https://a.com/2", &"b".repeat(100)),
        ];

        let (all, n) = user_content(&items, SectionKind::Articles, 10_000);
        assert_eq!(n, 2);
        assert!(all.starts_with("<content>[{"));
        assert!(all.ends_with("}]</content>"));

        let (one, n) = user_content(&items, SectionKind::Articles, 250);
        assert_eq!(n, 1);
        assert!(one.len() <= 250);
        assert!(!one.contains("https://a.com/2"));
    }

    #[test]
    fn test_user_content_shortens_oversized_first_item() {
        let items = vec![article("https://a.com/1", &"a".repeat(5_000))];
        let (content, n) = user_content(&items, SectionKind::Articles, 400);
        assert_eq!(n, 1);
        assert!(content.len() <= 400);
        assert!(content.contains("https://a.com/1"));
    }

    #[test]
    fn test_user_content_email_fields() {
        let (content, _) = user_content(&[email("Cage-free win")], SectionKind::Emails, 10_000);
        assert!(content.contains("\"sender\":\"Ana\""));
        assert!(content.contains("\"subject\":\"Cage-free win\""));
        assert!(!content.contains("\"url\""));
        assert!(!content.contains("\"link\""));

        let linked = email("Hiring").with_link(Some("https://mercyforanimals.org".to_string()));
        let (content, _) = user_content(&[linked], SectionKind::Emails, 10_000);
        assert!(content.contains("\"link\":\"https://mercyforanimals.org\""));
    }

    // ==================== Parsing Tests ====================

    #[test]
    fn test_parse_response_strips_code_fence() {
        let text = "Here you go:\n```json\n{\"bullet_points\": [{\"headline\": \"H\", \"one_sentence_summary\": \"S\", \"source_name\": \"N\", \"url\": \"https://a.com/1\"}]}\n```";
        let result = parse_response(text, SectionKind::Articles).unwrap();
        assert_eq!(result, SectionResult::Articles(vec![ArticleBullet {
            headline: "H".to_string(),
            one_sentence_summary: "S".to_string(),
            source_name: "N".to_string(),
            url: "https://a.com/1".to_string(),
        }]));
    }

    #[test]
    fn test_parse_response_skips_brackets_in_prose() {
        let text = "See [1] below: {\"bullet_points\": [{\"headline\": \"H\", \"one_sentence_summary\": \"S\", \"source_name\": \"N\", \"url\": \"https://a.com/1\"}]} Sources are listed in [2].";
        let result = parse_response(text, SectionKind::Articles).unwrap();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_parse_response_prefers_last_fenced_block() {
        let text = "Draft:\n```json\n[{\"headline\": \"Old\"}]\n```\nFinal:\n```json\n[{\"headline\": \"H\", \"one_sentence_summary\": \"S\", \"sender\": \"Ana\", \"subject\": \"Win\"}]\n```";
        let result = parse_response(text, SectionKind::Emails).unwrap();
        assert!(matches!(&result, SectionResult::Emails(b) if b[0].subject == "Win"));
    }

    #[test]
    fn test_parse_response_accepts_bare_array() {
        let text = r#"[{"headline": "H", "one_sentence_summary": "S", "sender": "Ana", "subject": "Win"}]"#;
        let result = parse_response(text, SectionKind::Emails).unwrap();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_parse_response_wrong_shape_is_schema_error() {
        let text = r#"{"bullet_points": [{"headline": "H"}]}"#;
        assert!(matches!(
            parse_response(text, SectionKind::Articles),
            Err(SummaryError::Schema(_))
        ));
        assert!(matches!(
            parse_response("no json here", SectionKind::Articles),
            Err(SummaryError::Schema(_))
        ));
    }

    // ==================== Validation Tests ====================

    #[test]
    fn test_validate_accepts_known_urls() {
        let items = vec![article("https://a.com/1", "x")];
        let result = SectionResult::Articles(vec![bullet("https://a.com/1")]);
        validate(&result, &items, 3).unwrap();
    }

    #[test]
    fn test_validate_rejects_unknown_url() {
        let items = vec![article("https://a.com/1", "x")];
        let result = SectionResult::Articles(vec![bullet("https://invented.com/story")]);
        assert!(matches!(
            validate(&result, &items, 3),
            Err(SummaryError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bullet_count() {
        let items = vec![article("https://a.com/1", "x")];
        let four = SectionResult::Articles(vec![bullet("https://a.com/1"); 4]);
        assert!(validate(&four, &items, 3).is_err());
        assert!(validate(&SectionResult::Articles(Vec::new()), &items, 3).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_field() {
        let items = vec![article("https://a.com/1", "x")];
        let mut b = bullet("https://a.com/1");
        b.headline = "  ".to_string();
        assert!(validate(&SectionResult::Articles(vec![b]), &items, 3).is_err());
    }

    #[test]
    fn test_validate_email_subjects() {
        let items = vec![email("Cage-free win")];
        let good = SectionResult::Emails(vec![EmailBullet {
            headline: "H".to_string(),
            one_sentence_summary: "S".to_string(),
            sender: "Ana".to_string(),
            subject: "Cage-free win".to_string(),
        }]);
        validate(&good, &items, 3).unwrap();

        let bad = SectionResult::Emails(vec![EmailBullet {
            headline: "H".to_string(),
            one_sentence_summary: "S".to_string(),
            sender: "Ana".to_string(),
            subject: "Something else".to_string(),
        }]);
        assert!(validate(&bad, &items, 3).is_err());
    }
}
