use feed_rs::parser;
use futures::future::join_all;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::RssFeed;
use crate::error::SourceError;
use crate::extractor::{clean_html, clean_html_excluding, parse_selector, PageFetcher};
use crate::models::{ContentItem, SourceType};
use crate::window::TimeWindow;

const DEFAULT_CONTENT_SELECTOR: &str = "article";
const FALLBACK_CONTENT_SELECTOR: &str = "body";

/// Fetch a feed and keep the entries published inside `window`.
///
/// With `follow_link`, each entry's page replaces the feed body. A page that
/// fails or has no matching content keeps the body from the feed.
pub async fn fetch_rss(
    fetcher: &dyn PageFetcher,
    feed: &RssFeed,
    window: &TimeWindow,
) -> Result<Vec<ContentItem>, SourceError> {
    let content = fetcher.fetch(&feed.url).await?;
    let mut items = parse_feed(content.as_bytes(), feed, window)?;

    if feed.follow_link && !items.is_empty() {
        let containers = [
            parse_selector(feed.content_selector.as_deref().unwrap_or(DEFAULT_CONTENT_SELECTOR))?,
            parse_selector(FALLBACK_CONTENT_SELECTOR)?,
        ];
        let strip = strip_selectors(feed)?;

        let pages = join_all(items.iter().map(|item| fetcher.fetch(&item.url))).await;
        for (item, page) in items.iter_mut().zip(pages) {
            match page {
                Ok(html) => match article_text(&html, &containers, &strip) {
                    Some(text) => item.body = text,
                    None => debug!(source = %feed.name, url = %item.url, "No article content on page"),
                },
                Err(e) => warn!(source = %feed.name, url = %item.url, error = %e, "Keeping feed body"),
            }
        }
    }

    info!(source = %feed.name, items = items.len(), "RSS feed collected");
    Ok(items)
}

fn strip_selectors(feed: &RssFeed) -> Result<Vec<Selector>, SourceError> {
    feed.strip_selectors
        .iter()
        .map(String::as_str)
        .map(parse_selector)
        .collect()
}

/// Text of the first non-empty container on a page
fn article_text(html: &str, containers: &[Selector], strip: &[Selector]) -> Option<String> {
    let doc = Html::parse_document(html);
    containers.iter().find_map(|sel| {
        let el = doc.select(sel).next()?;
        let text = clean_html_excluding(&el.inner_html(), strip);
        (!text.is_empty()).then_some(text)
    })
}

/// Parse RSS, Atom or JSON Feed content into window-filtered items, in feed order.
pub fn parse_feed(
    content: &[u8],
    source: &RssFeed,
    window: &TimeWindow,
) -> Result<Vec<ContentItem>, SourceError> {
    let source_name = source.name.as_str();
    let strip = strip_selectors(source)?;
    let parsed = parser::parse(content)
        .map_err(|e| SourceError::Parse(format!("Failed to parse feed: {}", e)))?;

    let mut items = Vec::new();
    for entry in parsed.entries {
        // Atom feeds often only carry <updated>
        let Some(published_at) = entry.published.or(entry.updated) else {
            debug!(source = source_name, id = %entry.id, "Skipping entry without a timestamp");
            continue;
        };

        if !window.contains(published_at) {
            continue;
        }

        let Some(url) = entry
            .links
            .first()
            .and_then(|link| absolute_link(&source.url, &link.href))
        else {
            debug!(source = source_name, id = %entry.id, "Skipping entry without a link");
            continue;
        };

        let title = entry
            .title
            .map(|t| clean_html(&t.content))
            .unwrap_or_default();

        let body = entry
            .content
            .and_then(|c| c.body)
            .or_else(|| entry.summary.map(|s| s.content))
            .map(|html| clean_html_excluding(&html, &strip))
            .unwrap_or_default();

        if let Some(item) = ContentItem::new(
            title,
            url,
            published_at,
            body,
            source_name,
            SourceType::Rss,
        ) {
            items.push(item);
        }
    }

    Ok(items)
}

/// Entry links may be relative to the feed; anything else unparsable is dropped.
fn absolute_link(feed_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    match Url::parse(href) {
        Ok(_) => Some(href.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let joined = Url::parse(feed_url).ok()?.join(href).ok()?;
            Some(joined.into())
        }
        Err(_) => None,
    }
}
