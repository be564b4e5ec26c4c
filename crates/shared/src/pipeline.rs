use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

use crate::briefing::{Briefing, BriefingGenerator, BriefingSection, InlineImage, SectionOutcome};
use crate::charts::{chart_caption, render_chart, MarketDataSource};
use crate::config::{ChartSpec, Config, SectionConfig, Settings};
use crate::delivery::{Mailer, OutgoingEmail, Recipients};
use crate::extractor::PageFetcher;
use crate::images::{image_prompt, ImageGenerator};
use crate::io::{save_newsletter, save_newsletter_in};
use crate::manager::ContentManager;
use crate::models::ContentItem;
use crate::sources::MailboxClient;
use crate::summarizer::SectionSummarizer;
use crate::window::{self, TimeWindow};

/// The external collaborators a run talks to
pub struct Services {
    pub pages: Arc<dyn PageFetcher>,
    pub mailbox: Arc<dyn MailboxClient>,
    pub summarizer: Arc<dyn SectionSummarizer>,
    pub images: Option<Arc<dyn ImageGenerator>>,
    pub market: Option<Arc<dyn MarketDataSource>>,
    pub mailer: Arc<dyn Mailer>,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub send_to_everyone: bool,
    /// Save the HTML instead of sending it
    pub dry_run: bool,
    /// Dry-run output directory; defaults to the local data directory
    pub output_dir: Option<PathBuf>,
    pub now: DateTime<Utc>,
}

impl RunOptions {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            send_to_everyone: false,
            dry_run: false,
            output_dir: None,
            now,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub window: TimeWindow,
    pub date: NaiveDate,
    pub items_collected: usize,
    pub sections_ready: usize,
    pub degraded_sections: Vec<String>,
    pub images: usize,
    pub charts: usize,
    /// Set when the briefing was sent
    pub recipients: Option<Recipients>,
    /// Set on dry runs
    pub saved_to: Option<PathBuf>,
}

impl RunReport {
    pub fn recipient_count(&self) -> usize {
        self.recipients.as_ref().map_or(0, Recipients::count)
    }
}

/// One full run. Only delivery (or, on a dry run, saving) failures are returned;
/// everything upstream degrades to less content.
pub async fn run(
    config: &Config,
    settings: &Settings,
    services: &Services,
    options: &RunOptions,
) -> Result<RunReport> {
    let window = window::resolve(options.now);
    let date = window::eastern_today(options.now);
    let deadline = Instant::now() + settings.fetch.deadline();

    info!(start = %window.start(), end = %window.end(), %date, "Resolved window");

    let manager = ContentManager::new(
        services.pages.clone(),
        services.mailbox.clone(),
        &settings.fetch,
    );
    let collected = manager.collect(&settings.sections, &window, deadline).await;
    let items_collected = collected.total_items();

    // one entry per configured section, in configured order
    let items: Vec<Vec<ContentItem>> = collected.into_iter().map(|s| s.items).collect();
    let outcomes = summarize_sections(settings, services, &items, deadline).await;

    let mut sections = Vec::with_capacity(outcomes.len());
    for (idx, (section, outcome)) in settings.sections.iter().zip(outcomes).enumerate() {
        let image = match (&services.images, &outcome) {
            (Some(generator), SectionOutcome::Ready { result }) => match result.lead() {
                Some((headline, summary)) => {
                    let prompt = image_prompt(headline, summary);
                    illustrate(generator.as_ref(), &section.name, idx, headline, &prompt, deadline)
                        .await
                }
                None => None,
            },
            _ => None,
        };

        sections.push(BriefingSection {
            name: section.name.clone(),
            kind: section.kind,
            outcome,
            image,
        });
    }

    let charts = match &services.market {
        Some(market) => build_charts(market.as_ref(), settings, deadline).await,
        None => Vec::new(),
    };

    let briefing = Briefing {
        date,
        sections,
        charts,
    };

    let degraded_sections: Vec<String> = briefing
        .sections
        .iter()
        .filter(|s| matches!(s.outcome, SectionOutcome::Degraded { .. }))
        .map(|s| s.name.clone())
        .collect();
    let sections_ready = briefing
        .sections
        .iter()
        .filter(|s| matches!(s.outcome, SectionOutcome::Ready { .. }))
        .count();

    let html = BriefingGenerator::generate(&briefing);
    info!(target: crate::logging::PROMPT_TARGET, "\nNEWSLETTER HTML\n{}", html);

    let images: Vec<InlineImage> = briefing.inline_images().into_iter().cloned().collect();
    let mut report = RunReport {
        window,
        date,
        items_collected,
        sections_ready,
        degraded_sections,
        images: briefing.sections.iter().filter(|s| s.image.is_some()).count(),
        charts: briefing.charts.len(),
        recipients: None,
        saved_to: None,
    };

    if options.dry_run {
        let path = match &options.output_dir {
            Some(dir) => save_newsletter_in(dir, &html, date)?,
            None => save_newsletter(&html, date)?,
        };
        info!(path = %path.display(), "Dry run: newsletter saved");
        report.saved_to = Some(path);
        return Ok(report);
    }

    let recipients = Recipients::resolve(
        &config.email_username,
        &config.recipient_emails,
        options.send_to_everyone,
    );
    let email = OutgoingEmail {
        subject: briefing.subject(),
        html,
        images,
    };

    info!(
        recipients = recipients.count(),
        send_to_everyone = options.send_to_everyone,
        "Sending briefing"
    );
    services
        .mailer
        .send(&email, &recipients)
        .await
        .context("Failed to deliver briefing")?;

    report.recipients = Some(recipients);
    Ok(report)
}

async fn summarize_sections(
    settings: &Settings,
    services: &Services,
    items: &[Vec<ContentItem>],
    deadline: Instant,
) -> Vec<SectionOutcome> {
    let concurrency = settings.fetch.concurrency.max(1);

    stream::iter(settings.sections.iter().zip(items))
        .map(|(section, items)| {
            summarize_one(services.summarizer.as_ref(), section, items, settings, deadline)
        })
        .buffered(concurrency)
        .collect()
        .await
}

async fn summarize_one(
    summarizer: &dyn SectionSummarizer,
    section: &SectionConfig,
    items: &[ContentItem],
    settings: &Settings,
    deadline: Instant,
) -> SectionOutcome {
    if items.is_empty() {
        info!(section = %section.name, "No content for section");
        return SectionOutcome::Empty;
    }

    match timeout_at(deadline, summarizer.summarize(section, items, &settings.style)).await {
        Ok(Ok(result)) => {
            info!(section = %section.name, bullets = result.len(), "Section summarized");
            SectionOutcome::Ready { result }
        }
        Ok(Err(e)) => {
            warn!(section = %section.name, error = %e, "Section degraded");
            SectionOutcome::Degraded {
                reason: e.to_string(),
            }
        }
        Err(_) => {
            warn!(section = %section.name, "Section degraded: run deadline exceeded");
            SectionOutcome::Degraded {
                reason: "run deadline exceeded".to_string(),
            }
        }
    }
}

async fn illustrate(
    generator: &dyn ImageGenerator,
    section: &str,
    idx: usize,
    headline: &str,
    prompt: &str,
    deadline: Instant,
) -> Option<InlineImage> {
    match timeout_at(deadline, generator.generate(prompt)).await {
        Ok(Ok(image)) => Some(InlineImage {
            content_id: format!("section-{}", idx),
            mime_type: image.mime_type,
            bytes: image.bytes,
            alt: headline.to_string(),
        }),
        Ok(Err(e)) => {
            warn!(section, error = %e, "Image generation failed");
            None
        }
        Err(_) => {
            warn!(section, "Image generation abandoned at run deadline");
            None
        }
    }
}

async fn build_charts(
    market: &dyn MarketDataSource,
    settings: &Settings,
    deadline: Instant,
) -> Vec<InlineImage> {
    let mut charts = Vec::new();
    for (idx, spec) in settings.charts.iter().enumerate() {
        match chart_image(market, spec, settings, idx, deadline).await {
            Ok(image) => charts.push(image),
            Err(e) => warn!(ticker = %spec.ticker, error = %e, "Chart omitted"),
        }
    }
    charts
}

async fn chart_image(
    market: &dyn MarketDataSource,
    spec: &ChartSpec,
    settings: &Settings,
    idx: usize,
    deadline: Instant,
) -> Result<InlineImage> {
    let series = timeout_at(deadline, market.series(spec, &settings.chart.range))
        .await
        .context("run deadline exceeded")??;
    let bytes = render_chart(&series, &settings.chart)?;

    Ok(InlineImage {
        content_id: format!("chart-{}", idx),
        mime_type: "image/png".to_string(),
        bytes,
        alt: chart_caption(&series, &settings.chart.range),
    })
}
