use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Node, Selector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::FetchSettings;
use crate::error::SourceError;

/// Something that can retrieve a document body by URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, SourceError>;
}

pub struct ContentExtractor {
    client: Client,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
}

impl ContentExtractor {
    pub fn new(settings: &FetchSettings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.page_timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(settings.user_agent.as_str())
            .cookie_store(true)
            .build()
            .context("Failed to create HTTP client")?;

        let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));

        Ok(Self {
            client,
            semaphore,
            timeout,
        })
    }
}

#[async_trait]
impl PageFetcher for ContentExtractor {
    async fn fetch(&self, url: &str) -> Result<String, SourceError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| SourceError::Parse(format!("fetcher closed: {}", e)))?;

        debug!(url, "fetching");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout(self.timeout)
                } else {
                    SourceError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }
}

fn is_hidden(tag: &str) -> bool {
    matches!(tag, "script" | "style" | "svg" | "iframe" | "noscript" | "head")
}

pub fn parse_selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::Parse(format!("Invalid selector {:?}: {}", css, e)))
}

/// Reduce an HTML document or fragment to its visible text, whitespace collapsed.
pub fn clean_html(html: &str) -> String {
    clean_html_excluding(html, &[])
}

/// Like [`clean_html`], also dropping the text of any element matching `strip`.
pub fn clean_html_excluding(html: &str, strip: &[Selector]) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let doc = Html::parse_fragment(html);
    let mut words: Vec<&str> = Vec::new();

    for node in doc.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().filter_map(ElementRef::wrap).any(|el| {
            is_hidden(el.value().name()) || strip.iter().any(|sel| sel.matches(&el))
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }

    words.join(" ")
}

/// Longest prefix of `text` holding at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_html_strips_tags_and_scripts() {
        let html = "<div class=\"x\"><script>var a = 1;</script><p>Hello <b>world</b></p>\n\n<style>p{}</style><p>again</p></div>";
        assert_eq!(clean_html(html), "Hello world again");
    }

    #[test]
    fn test_clean_html_excluding_drops_matching_elements() {
        let strip = [parse_selector("div.wp-caption").unwrap()];
        let html = r#"<p>Oatly grew.</p><div class="wp-caption"><img src="a.jpg"><p>Photo: Oatly</p></div><p>Volume doubled.</p>"#;
        assert_eq!(clean_html_excluding(html, &strip), "Oatly grew. Volume doubled.");
    }

    #[test]
    fn test_parse_selector_rejects_invalid_css() {
        assert!(matches!(parse_selector("div[["), Err(SourceError::Parse(_))));
    }

    #[test]
    fn test_clean_html_decodes_entities() {
        assert_eq!(clean_html("<p>Fish &amp; Chips</p>"), "Fish & Chips");
    }

    #[test]
    fn test_clean_html_plain_text_passthrough() {
        assert_eq!(clean_html("  just   text "), "just text");
    }

    #[test]
    fn test_clean_html_empty() {
        assert_eq!(clean_html("   "), "");
    }

    #[test]
    fn test_truncate_chars_shorter_than_limit() {
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
    }
}
