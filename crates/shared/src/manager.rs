use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{info, warn};

use crate::config::{FetchSettings, SectionConfig, SectionLimits, SourceDescriptor, Truncation};
use crate::error::SourceError;
use crate::extractor::PageFetcher;
use crate::models::{CollectedSections, ContentItem, SectionContent};
use crate::sources::{fetch_email, fetch_rss, fetch_sitemap, MailboxClient};
use crate::window::TimeWindow;

/// Runs every configured source against one shared window and merges the results per section.
pub struct ContentManager {
    pages: Arc<dyn PageFetcher>,
    mailbox: Arc<dyn MailboxClient>,
    concurrency: usize,
    source_timeout: Duration,
}

impl ContentManager {
    pub fn new(
        pages: Arc<dyn PageFetcher>,
        mailbox: Arc<dyn MailboxClient>,
        settings: &FetchSettings,
    ) -> Self {
        Self {
            pages,
            mailbox,
            concurrency: settings.concurrency.max(1),
            source_timeout: settings.source_timeout(),
        }
    }

    /// Collect all sections. Never fails: a failing source contributes no items.
    pub async fn collect(
        &self,
        sections: &[SectionConfig],
        window: &TimeWindow,
        deadline: Instant,
    ) -> CollectedSections {
        let jobs: Vec<(usize, &SourceDescriptor)> = sections
            .iter()
            .enumerate()
            .flat_map(|(idx, section)| section.sources.iter().map(move |source| (idx, source)))
            .collect();

        info!(
            sections = sections.len(),
            sources = jobs.len(),
            start = %window.start(),
            end = %window.end(),
            "Collecting content"
        );

        // buffered() keeps job order, so results come back in configured source order
        let results: Vec<(usize, &SourceDescriptor, Result<Vec<ContentItem>, SourceError>)> =
            stream::iter(jobs)
                .map(|(idx, source)| async move {
                    let result = self.run_source(source, window, deadline).await;
                    (idx, source, result)
                })
                .buffered(self.concurrency)
                .collect()
                .await;

        let mut per_section: Vec<Vec<Vec<ContentItem>>> = vec![Vec::new(); sections.len()];
        for (idx, source, result) in results {
            let section = &sections[idx].name;
            match result {
                Ok(items) => {
                    info!(section = %section, source = source.name(), items = items.len(), "Source done");
                    per_section[idx].push(items);
                }
                Err(e) => {
                    warn!(section = %section, source = source.name(), error = %e, "Source failed, skipping");
                }
            }
        }

        let collected = sections
            .iter()
            .zip(per_section)
            .map(|(section, batches)| SectionContent {
                name: section.name.clone(),
                items: merge_section(batches, &section.limits),
            })
            .collect();

        CollectedSections::new(collected)
    }

    async fn run_source(
        &self,
        source: &SourceDescriptor,
        window: &TimeWindow,
        deadline: Instant,
    ) -> Result<Vec<ContentItem>, SourceError> {
        let pages = self.pages.as_ref();
        let fut = async {
            match source {
                SourceDescriptor::Rss(feed) => fetch_rss(pages, feed, window).await,
                SourceDescriptor::Sitemap(site) => fetch_sitemap(pages, site, window).await,
                SourceDescriptor::Email(filter) => {
                    fetch_email(self.mailbox.as_ref(), filter, window).await
                }
            }
        };

        match timeout_at(deadline, timeout(self.source_timeout, fut)).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SourceError::Timeout(self.source_timeout)),
            Err(_) => Err(SourceError::Deadline),
        }
    }
}

/// Merge one section's per-source batches (in configured order).
///
/// Duplicated URLs keep their first occurrence. Bodies are cut to
/// `max_body_chars`, then `max_items` is applied per the truncation policy.
/// Survivors keep source-then-discovery order.
pub fn merge_section(batches: Vec<Vec<ContentItem>>, limits: &SectionLimits) -> Vec<ContentItem> {
    let mut seen = HashSet::new();
    let mut items: Vec<ContentItem> = batches
        .into_iter()
        .flatten()
        .filter(|item| seen.insert(item.url.clone()))
        .collect();

    for item in &mut items {
        item.truncate_body(limits.max_body_chars);
    }

    match limits.max_items {
        Some(max) if items.len() > max => cap(items, max, limits.truncation),
        _ => items,
    }
}

fn cap(items: Vec<ContentItem>, max: usize, truncation: Truncation) -> Vec<ContentItem> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    // Stable sort: equal timestamps keep their earlier position
    match truncation {
        Truncation::NewestFirst => {
            order.sort_by(|&a, &b| items[b].published_at.cmp(&items[a].published_at))
        }
        Truncation::OldestFirst => {
            order.sort_by(|&a, &b| items[a].published_at.cmp(&items[b].published_at))
        }
    }

    let keep: HashSet<usize> = order.into_iter().take(max).collect();
    items
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| keep.contains(idx))
        .map(|(_, item)| item)
        .collect()
}
