use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use scraper::Html;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::parse_timestamp;
use crate::config::{Recency, SitemapSite};
use crate::error::SourceError;
use crate::extractor::{clean_html, parse_selector, PageFetcher};
use crate::models::{ContentItem, SourceType};
use crate::window::{eastern_at, TimeWindow, DATE_ONLY_HOUR};

const DEFAULT_TITLE_SELECTOR: &str = "h1";
const FALLBACK_TITLE_SELECTOR: &str = "title";
const DEFAULT_BODY_SELECTOR: &str = "article";
const FALLBACK_BODY_SELECTOR: &str = "body";
const PUBLISHED_META_SELECTOR: &str = r#"meta[property="article:published_time"]"#;

// /2026/02/03/ or a 2026-02-03 slug
static URL_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^0-9])((?:19|20)\d{2})[/-](\d{2})[/-](\d{2})(?:[^0-9]|$)")
        .expect("URL date regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SitemapEntry {
    pub loc: String,
    #[serde(default)]
    pub lastmod: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UrlSet {
    #[serde(rename = "url", default)]
    urls: Vec<SitemapEntry>,
}

#[derive(Debug, Deserialize)]
struct SitemapIndex {
    #[serde(rename = "sitemap", default)]
    sitemaps: Vec<SitemapEntry>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SitemapDocument {
    /// `<sitemapindex>`: locations of child sitemaps
    Index(Vec<SitemapEntry>),
    /// `<urlset>`: page locations
    UrlSet(Vec<SitemapEntry>),
}

pub fn parse_sitemap(xml: &str) -> Result<SitemapDocument, SourceError> {
    let trim = |entries: Vec<SitemapEntry>| -> Vec<SitemapEntry> {
        entries
            .into_iter()
            .map(|e| SitemapEntry {
                loc: e.loc.trim().to_string(),
                lastmod: e.lastmod.map(|m| m.trim().to_string()),
            })
            .filter(|e| !e.loc.is_empty())
            .collect()
    };

    if xml.contains("<sitemapindex") || xml.contains(":sitemapindex") {
        let index: SitemapIndex = from_str(xml)
            .map_err(|e| SourceError::Parse(format!("Invalid sitemap index: {}", e)))?;
        Ok(SitemapDocument::Index(trim(index.sitemaps)))
    } else if xml.contains("<urlset") || xml.contains(":urlset") {
        let set: UrlSet =
            from_str(xml).map_err(|e| SourceError::Parse(format!("Invalid sitemap: {}", e)))?;
        Ok(SitemapDocument::UrlSet(trim(set.urls)))
    } else {
        Err(SourceError::Parse(
            "Document is neither a <urlset> nor a <sitemapindex>".to_string(),
        ))
    }
}

/// Calendar date embedded in a URL path, dated at noon Eastern
pub fn date_from_url(url: &str) -> Option<DateTime<Utc>> {
    let caps = URL_DATE.captures(url)?;
    let year = caps.get(1)?.as_str().parse().ok()?;
    let month = caps.get(2)?.as_str().parse().ok()?;
    let day = caps.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day).map(|date| eastern_at(date, DATE_ONLY_HOUR))
}

/// Best-effort publication time of a sitemap entry; `None` means undatable.
pub fn entry_timestamp(entry: &SitemapEntry, recency: Recency) -> Option<DateTime<Utc>> {
    let from_lastmod = || entry.lastmod.as_deref().and_then(parse_timestamp);
    let from_url = || date_from_url(&entry.loc);

    match recency {
        Recency::LastmodThenUrl => from_lastmod().or_else(from_url),
        Recency::LastmodOnly => from_lastmod(),
        Recency::UrlOnly => from_url(),
    }
}

/// Entries confidently dated inside `window`, in discovery order
pub fn recent_entries(
    entries: Vec<SitemapEntry>,
    recency: Recency,
    window: &TimeWindow,
) -> Vec<(SitemapEntry, DateTime<Utc>)> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let at = entry_timestamp(&entry, recency)?;
            window.contains(at).then_some((entry, at))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    pub title: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
}

fn first_match(doc: &Html, primary: &str, fallback: &str) -> Result<Option<String>, SourceError> {
    for css in [primary, fallback] {
        let sel = parse_selector(css)?;
        if let Some(el) = doc.select(&sel).next() {
            let text = clean_html(&el.inner_html());
            if !text.is_empty() {
                return Ok(Some(text));
            }
        }
    }
    Ok(None)
}

/// Pull title, body and an explicit publication time out of an article page.
pub fn extract_page(html: &str, site: &SitemapSite) -> Result<PageContent, SourceError> {
    let doc = Html::parse_document(html);

    let title = first_match(
        &doc,
        site.title_selector.as_deref().unwrap_or(DEFAULT_TITLE_SELECTOR),
        FALLBACK_TITLE_SELECTOR,
    )?
    .unwrap_or_default();

    let body = first_match(
        &doc,
        site.body_selector.as_deref().unwrap_or(DEFAULT_BODY_SELECTOR),
        FALLBACK_BODY_SELECTOR,
    )?
    .unwrap_or_default();

    let published_at = doc
        .select(&parse_selector(PUBLISHED_META_SELECTOR)?)
        .filter_map(|meta| meta.value().attr("content"))
        .find_map(parse_timestamp);

    Ok(PageContent {
        title,
        body,
        published_at,
    })
}

fn check_selectors(site: &SitemapSite) -> Result<(), SourceError> {
    for css in [&site.title_selector, &site.body_selector].into_iter().flatten() {
        parse_selector(css)?;
    }
    Ok(())
}

async fn child_entries(
    fetcher: &dyn PageFetcher,
    site: &SitemapSite,
    children: Vec<SitemapEntry>,
    window: &TimeWindow,
) -> Result<Vec<SitemapEntry>, SourceError> {
    let children: Vec<SitemapEntry> = children
        .into_iter()
        .filter(|child| match &site.include_prefix {
            Some(prefix) => child.loc.starts_with(prefix.as_str()),
            None => true,
        })
        // A child sitemap untouched since before the window cannot list new pages
        .filter(|child| match child.lastmod.as_deref().and_then(parse_timestamp) {
            Some(modified) => modified >= window.start(),
            None => true,
        })
        .collect();

    if children.is_empty() {
        return Ok(Vec::new());
    }

    let results = join_all(children.iter().map(|child| fetcher.fetch(&child.loc))).await;

    let mut entries = Vec::new();
    let mut first_error = None;
    let mut any_ok = false;

    for (child, result) in children.iter().zip(results) {
        match result.and_then(|xml| parse_sitemap(&xml)) {
            Ok(SitemapDocument::UrlSet(urls)) => {
                any_ok = true;
                entries.extend(urls);
            }
            Ok(SitemapDocument::Index(_)) => {
                any_ok = true;
                debug!(source = %site.name, url = %child.loc, "Ignoring nested sitemap index");
            }
            Err(e) => {
                warn!(source = %site.name, url = %child.loc, error = %e, "Child sitemap failed");
                first_error.get_or_insert(e);
            }
        }
    }

    match (any_ok, first_error) {
        (false, Some(e)) => Err(e),
        _ => Ok(entries),
    }
}

/// Read a sitemap (or sitemap index), then fetch every page dated inside `window`.
pub async fn fetch_sitemap(
    fetcher: &dyn PageFetcher,
    site: &SitemapSite,
    window: &TimeWindow,
) -> Result<Vec<ContentItem>, SourceError> {
    check_selectors(site)?;

    let root = fetcher.fetch(&site.url).await?;
    let entries = match parse_sitemap(&root)? {
        SitemapDocument::UrlSet(urls) => urls,
        SitemapDocument::Index(children) => child_entries(fetcher, site, children, window).await?,
    };

    let total = entries.len();
    let candidates = recent_entries(entries, site.recency, window);
    debug!(
        source = %site.name,
        total,
        candidates = candidates.len(),
        "Sitemap entries dated"
    );

    let pages = join_all(candidates.iter().map(|(entry, _)| fetcher.fetch(&entry.loc))).await;

    let mut items = Vec::new();
    for ((entry, dated), page) in candidates.into_iter().zip(pages) {
        let page = match page.and_then(|html| extract_page(&html, site)) {
            Ok(page) => page,
            Err(e) => {
                warn!(source = %site.name, url = %entry.loc, error = %e, "Skipping page");
                continue;
            }
        };

        let published_at = page.published_at.unwrap_or(dated);
        if !window.contains(published_at) {
            debug!(source = %site.name, url = %entry.loc, "Page published outside window");
            continue;
        }

        match ContentItem::new(
            page.title,
            entry.loc.clone(),
            published_at,
            page.body,
            site.name.as_str(),
            SourceType::Sitemap,
        ) {
            Some(item) => items.push(item),
            None => debug!(source = %site.name, url = %entry.loc, "Page has no title"),
        }
    }

    info!(source = %site.name, items = items.len(), "Sitemap collected");
    Ok(items)
}
