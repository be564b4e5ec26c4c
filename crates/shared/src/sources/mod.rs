//! Adapters that turn one external source into normalized [`ContentItem`](crate::models::ContentItem)s.
//!
//! Every adapter receives the run's shared [`TimeWindow`](crate::window::TimeWindow) and returns only the
//! items inside it. Errors are source-level; the content manager isolates them.

pub mod email;
pub mod rss;
pub mod sitemap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::window::{eastern_at, DATE_ONLY_HOUR};

pub use email::{fetch_email, ImapMailbox, MailboxClient, RawMessage};
pub use rss::fetch_rss;
pub use sitemap::fetch_sitemap;

/// Parse the timestamp formats found in feeds, sitemaps and meta tags.
///
/// A value that carries only a calendar day is placed at noon Eastern.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    // W3C datetime without seconds, e.g. 2026-02-03T10:15+00:00
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M%:z") {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }

    // No offset: read as UTC
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|date| eastern_at(date, DATE_ONLY_HOUR))
}
