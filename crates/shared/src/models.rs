use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extractor::truncate_chars;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Rss,
    Sitemap,
    Email,
}

/// Sender and subject of the message an email item was extracted from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailOrigin {
    pub sender: String,
    pub subject: String,
    /// First link in the story text. Display only; never used as the item key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// A normalized piece of content produced by any source adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub body: String,
    pub source_name: String,
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailOrigin>,
}

impl ContentItem {
    /// Returns `None` when the title or url is blank; adapters drop such items.
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        published_at: DateTime<Utc>,
        body: impl Into<String>,
        source_name: impl Into<String>,
        source_type: SourceType,
    ) -> Option<Self> {
        let title = title.into().trim().to_string();
        let url = url.into().trim().to_string();
        if title.is_empty() || url.is_empty() {
            return None;
        }

        Some(Self {
            title,
            url,
            published_at,
            body: body.into(),
            source_name: source_name.into(),
            source_type,
            email: None,
        })
    }

    pub fn with_email(mut self, sender: impl Into<String>, subject: impl Into<String>) -> Self {
        self.email = Some(EmailOrigin {
            sender: sender.into(),
            subject: subject.into(),
            link: None,
        });
        self
    }

    pub fn with_link(mut self, link: Option<String>) -> Self {
        if let Some(origin) = self.email.as_mut() {
            origin.link = link;
        }
        self
    }

    pub fn truncate_body(&mut self, max_chars: usize) {
        if self.body.chars().count() > max_chars {
            self.body = truncate_chars(&self.body, max_chars).to_string();
        }
    }
}

/// The collected items for one configured section
#[derive(Debug, Clone, Serialize)]
pub struct SectionContent {
    pub name: String,
    pub items: Vec<ContentItem>,
}

/// Per-section results of one collection run, in configured section order
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectedSections {
    sections: Vec<SectionContent>,
}

impl CollectedSections {
    pub fn new(sections: Vec<SectionContent>) -> Self {
        Self { sections }
    }

    pub fn get(&self, name: &str) -> Option<&[ContentItem]> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.items.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &SectionContent> {
        self.sections.iter()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn total_items(&self) -> usize {
        self.sections.iter().map(|s| s.items.len()).sum()
    }
}

impl IntoIterator for CollectedSections {
    type Item = SectionContent;
    type IntoIter = std::vec::IntoIter<SectionContent>;

    fn into_iter(self) -> Self::IntoIter {
        self.sections.into_iter()
    }
}
