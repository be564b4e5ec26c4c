use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::charts::parse_color;
use crate::extractor::parse_selector;
use crate::models::SourceType;

const APP_DIR: &str = "daily-briefing";
const SETTINGS_FILE: &str = "briefing.toml";

/// Credentials, read from the environment once at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub email_username: String,
    pub email_password: String,
    pub recipient_emails: Vec<String>,
    pub stability_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Try to load .env from multiple locations
        Self::try_load_dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let anthropic_api_key = required(&lookup, "ANTHROPIC_API_KEY").context(
            "ANTHROPIC_API_KEY not found.\n\n\
            Get your Anthropic API key from: https://console.anthropic.com/settings/keys",
        )?;

        let email_username = required(&lookup, "GOOGLE_USERNAME").context(
            "GOOGLE_USERNAME not found.\n\n\
            This account reads the mailbox sources, sends the briefing, and is the\n\
            default recipient.",
        )?;

        let email_password = required(&lookup, "GOOGLE_PASSWORD").context(
            "GOOGLE_PASSWORD not found.\n\n\
            Use an app password for the GOOGLE_USERNAME account.",
        )?;

        let recipient_emails = lookup("RECIPIENT_EMAILS")
            .map(|list| {
                list.split(',')
                    .map(|email| email.trim().to_string())
                    .filter(|email| !email.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let stability_api_key = lookup("STABILITY_API_KEY").filter(|key| !key.trim().is_empty());

        Ok(Self {
            anthropic_api_key,
            email_username,
            email_password,
            recipient_emails,
            stability_api_key,
        })
    }

    fn try_load_dotenv() {
        // Try locations in order of preference:

        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. ~/.config/daily-briefing/.env (standard config location)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join(APP_DIR).join(".env");
            if config_path.exists() && dotenvy::from_path(&config_path).is_ok() {
                return;
            }
        }

        // 3. ~/.env (home directory)
        if let Some(home_dir) = dirs::home_dir() {
            let home_path = home_dir.join(".env");
            if home_path.exists() {
                let _ = dotenvy::from_path(&home_path);
            }
        }

        // If none found, that's okay - environment variables might be set system-wide
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => anyhow::bail!("missing required setting {}", key),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Upper bound on concurrently running source fetches and page requests
    pub concurrency: usize,
    pub source_timeout_secs: u64,
    pub page_timeout_secs: u64,
    /// Hard limit for the whole run; unfinished work is abandoned
    pub deadline_secs: u64,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            source_timeout_secs: 120,
            page_timeout_secs: 30,
            deadline_secs: 900,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

impl FetchSettings {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub timeout_secs: u64,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            imap_host: "imap.gmail.com".to_string(),
            imap_port: 993,
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            timeout_secs: 60,
        }
    }
}

/// Constraints handed to the summarizer for every section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StyleSettings {
    pub model: String,
    pub reader_profile: String,
    pub tone: String,
    pub bullets_per_section: usize,
    pub max_prompt_tokens: usize,
    pub timeout_secs: u64,
}

impl Default for StyleSettings {
    fn default() -> Self {
        Self {
            model: "claude-3-5-haiku-20241022".to_string(),
            reader_profile: "a philanthropist who donates to nonprofits working to create a vegan \
                world and an investor in alternative protein startups. They want comprehensive \
                updates on the alternative protein industry for investment decisions, meaningful \
                developments in the vegan movement to inform donation strategies, and insights \
                from effective altruism to maximize their impact."
                .to_string(),
            tone: "conversational and engaging, like a well-informed colleague giving you \
                updates. Use clear language with a light touch, but stay professional."
                .to_string(),
            bullets_per_section: 3,
            max_prompt_tokens: 25_000,
            timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChartStyle {
    pub line_color: String,
    pub grid_color: String,
    pub background_color: String,
    /// Yahoo Finance range string, e.g. `1mo`, `6mo`, `1y`
    pub range: String,
    pub width: u32,
    pub height: u32,
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            line_color: "#1e3d59".to_string(),
            grid_color: "#e0e0e0".to_string(),
            background_color: "#ffffff".to_string(),
            range: "1y".to_string(),
            width: 800,
            height: 400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartSpec {
    pub ticker: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    #[default]
    Articles,
    Emails,
}

/// Which items survive when a section holds more than `max_items`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Truncation {
    /// Keep the most recent items
    #[default]
    NewestFirst,
    /// Keep the earliest items
    OldestFirst,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SectionLimits {
    pub max_items: Option<usize>,
    pub max_body_chars: usize,
    pub truncation: Truncation,
}

impl Default for SectionLimits {
    fn default() -> Self {
        Self {
            max_items: None,
            max_body_chars: 4000,
            truncation: Truncation::NewestFirst,
        }
    }
}

/// How the sitemap adapter decides an entry is recent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recency {
    /// `<lastmod>` when present, otherwise a date in the URL
    #[default]
    LastmodThenUrl,
    LastmodOnly,
    UrlOnly,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RssFeed {
    pub name: String,
    pub url: String,
    /// Fetch each entry's page and use its text instead of the feed body
    #[serde(default)]
    pub follow_link: bool,
    /// Element holding the article on a followed page (default `article`, then `body`)
    #[serde(default)]
    pub content_selector: Option<String>,
    /// Elements whose text is dropped from the body, e.g. image captions
    #[serde(default)]
    pub strip_selectors: Vec<String>,
}

impl RssFeed {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            follow_link: false,
            content_selector: None,
            strip_selectors: Vec::new(),
        }
    }

    pub fn selectors(&self) -> impl Iterator<Item = &str> {
        self.content_selector
            .iter()
            .chain(&self.strip_selectors)
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SitemapSite {
    pub name: String,
    pub url: String,
    /// For sitemap indexes: only child sitemaps starting with this prefix are read
    #[serde(default)]
    pub include_prefix: Option<String>,
    #[serde(default)]
    pub recency: Recency,
    #[serde(default)]
    pub title_selector: Option<String>,
    #[serde(default)]
    pub body_selector: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailboxFilter {
    pub name: String,
    /// Matched against both the To and From headers
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    #[serde(default)]
    pub strip_subject_prefix: Option<String>,
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceDescriptor {
    Rss(RssFeed),
    Sitemap(SitemapSite),
    Email(MailboxFilter),
}

impl SourceDescriptor {
    pub fn name(&self) -> &str {
        match self {
            SourceDescriptor::Rss(feed) => &feed.name,
            SourceDescriptor::Sitemap(site) => &site.name,
            SourceDescriptor::Email(filter) => &filter.name,
        }
    }

    /// Every CSS selector the source carries
    pub fn selectors(&self) -> Vec<&str> {
        match self {
            SourceDescriptor::Rss(feed) => feed.selectors().collect(),
            SourceDescriptor::Sitemap(site) => [&site.title_selector, &site.body_selector]
                .into_iter()
                .flatten()
                .map(String::as_str)
                .collect(),
            SourceDescriptor::Email(_) => Vec::new(),
        }
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            SourceDescriptor::Rss(_) => SourceType::Rss,
            SourceDescriptor::Sitemap(_) => SourceType::Sitemap,
            SourceDescriptor::Email(_) => SourceType::Email,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SectionConfig {
    pub name: String,
    #[serde(default)]
    pub kind: SectionKind,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub sources: Vec<SourceDescriptor>,
    #[serde(default)]
    pub limits: SectionLimits,
}

/// Everything about a run that is not a secret
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub fetch: FetchSettings,
    pub mail: MailSettings,
    pub style: StyleSettings,
    pub chart: ChartStyle,
    pub charts: Vec<ChartSpec>,
    pub sections: Vec<SectionConfig>,
}

const COMMON_PROMPT: &str = "Your task is to identify the most important news items from the \
    content provided and output them in a structured format. Ensure all claims are \
    substantiated by the sources provided.";

impl Default for Settings {
    fn default() -> Self {
        let section = |name: &str, kind: SectionKind, focus: &str, sources| SectionConfig {
            name: name.to_string(),
            kind,
            prompt: format!("{} {}", COMMON_PROMPT, focus),
            sources,
            limits: SectionLimits::default(),
        };

        Self {
            fetch: FetchSettings::default(),
            mail: MailSettings::default(),
            style: StyleSettings::default(),
            chart: ChartStyle::default(),
            charts: vec![
                ChartSpec {
                    ticker: "BYND".to_string(),
                    display_name: "Beyond Meat".to_string(),
                },
                ChartSpec {
                    ticker: "OTLY".to_string(),
                    display_name: "Oatly".to_string(),
                },
                ChartSpec {
                    ticker: "^GSPC".to_string(),
                    display_name: "S&P 500".to_string(),
                },
            ],
            sections: vec![
                section(
                    "Alternative Protein",
                    SectionKind::Articles,
                    "You are an analyst specializing in the alternative protein industry. Focus \
                     on recent developments, especially funding rounds and new product launches.",
                    vec![
                        SourceDescriptor::Sitemap(SitemapSite {
                            name: "Green Queen".to_string(),
                            url: "https://www.greenqueen.com.hk/sitemap_index.xml".to_string(),
                            include_prefix: Some(
                                "https://www.greenqueen.com.hk/post-sitemap".to_string(),
                            ),
                            recency: Recency::LastmodThenUrl,
                            title_selector: Some("h1.single-post-title".to_string()),
                            body_selector: Some("div.entry-content".to_string()),
                        }),
                        SourceDescriptor::Rss(RssFeed {
                            strip_selectors: vec!["div.wp-caption".to_string()],
                            ..RssFeed::new("Vegconomist", "https://vegconomist.com/feed/")
                        }),
                    ],
                ),
                section(
                    "Vegan Movement",
                    SectionKind::Emails,
                    "You are an analyst specializing in the vegan movement and animal welfare. \
                     Focus on recent accomplishments, new research, and lessons learned that \
                     would be relevant to philanthropists. Note that Farmed Animal Strategic \
                     Team (FAST) is not the name of an organization, but simply the name of an \
                     email list where people in the vegan movement share updates.",
                    vec![SourceDescriptor::Email(MailboxFilter {
                        name: "FAST Email List".to_string(),
                        address: Some("fast-farm-animal-strategic-team@googlegroups.com".to_string()),
                        subject: None,
                        mailbox: default_mailbox(),
                        strip_subject_prefix: Some("FAST ♞ ".to_string()),
                    })],
                ),
                section(
                    "Effective Altruism",
                    SectionKind::Articles,
                    "You are an analyst specializing in effective altruism. Focus on the latest \
                     discussions that would be relevant to philanthropists seeking to maximize \
                     their impact.",
                    vec![SourceDescriptor::Rss(RssFeed::new(
                        "EA Forum",
                        "https://forum.effectivealtruism.org/feed.xml?view=frontpage-rss&karmaThreshold=2",
                    ))],
                ),
                section(
                    "AI",
                    SectionKind::Articles,
                    "You are an analyst specializing in artificial intelligence. Focus on new AI \
                     developments that could increase personal productivity and cutting-edge \
                     advancements from major AI companies.",
                    vec![SourceDescriptor::Rss(RssFeed {
                        follow_link: true,
                        content_selector: Some("div#content-blocks".to_string()),
                        ..RssFeed::new("The Rundown AI", "https://rss.beehiiv.com/feeds/2R3C6Bt5wj.xml")
                    })],
                ),
            ],
        }
    }
}

impl Settings {
    /// Load settings from `path`, the user config directory, or the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid settings TOML")
    }

    pub fn validate(&self) -> Result<()> {
        if self.sections.is_empty() {
            anyhow::bail!("No sections configured. Add at least one [[sections]] entry.");
        }

        if self.fetch.concurrency == 0 {
            anyhow::bail!("fetch.concurrency must be at least 1");
        }

        if self.style.bullets_per_section == 0 {
            anyhow::bail!("style.bullets_per_section must be at least 1");
        }

        for (field, value) in [
            ("chart.line_color", &self.chart.line_color),
            ("chart.grid_color", &self.chart.grid_color),
            ("chart.background_color", &self.chart.background_color),
        ] {
            parse_color(value).with_context(|| format!("Invalid {}", field))?;
        }

        let mut seen = HashSet::new();
        for section in &self.sections {
            if section.name.trim().is_empty() {
                anyhow::bail!("Section names must not be empty");
            }
            if !seen.insert(section.name.as_str()) {
                anyhow::bail!("Duplicate section name: {}", section.name);
            }
            for source in &section.sources {
                if source.name().trim().is_empty() {
                    anyhow::bail!("Section {} has a source without a name", section.name);
                }
                for css in source.selectors() {
                    parse_selector(css).with_context(|| {
                        format!("Section {}, source {}", section.name, source.name())
                    })?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // ==================== Credentials Tests ====================

    #[test]
    fn test_config_requires_api_key() {
        let result = Config::from_lookup(lookup_from(&[
            ("GOOGLE_USERNAME", "me@example.com"),
            ("GOOGLE_PASSWORD", "secret"),
        ]));
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_config_blank_value_counts_as_missing() {
        let result = Config::from_lookup(lookup_from(&[
            ("ANTHROPIC_API_KEY", "key"),
            ("GOOGLE_USERNAME", "   "),
            ("GOOGLE_PASSWORD", "secret"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_parses_recipient_list() {
        let config = Config::from_lookup(lookup_from(&[
            ("ANTHROPIC_API_KEY", "key"),
            ("GOOGLE_USERNAME", "me@example.com"),
            ("GOOGLE_PASSWORD", "secret"),
            ("RECIPIENT_EMAILS", " a@example.com, ,b@example.com "),
        ]))
        .unwrap();

        assert_eq!(config.recipient_emails, vec!["a@example.com", "b@example.com"]);
        assert!(config.stability_api_key.is_none());
    }

    // ==================== Settings Tests ====================

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.sections.len(), 4);
        assert_eq!(settings.sections[1].kind, SectionKind::Emails);
    }

    #[test]
    fn test_parse_sections_from_toml() {
        let settings = Settings::from_toml_str(
            r#"
            [fetch]
            concurrency = 2

            [[sections]]
            name = "Climate"
            prompt = "Focus on climate."

            [sections.limits]
            max_items = 10
            truncation = "oldest_first"

            [[sections.sources]]
            type = "rss"
            name = "Heatmap"
            url = "https://example.com/feed"

            [[sections.sources]]
            type = "sitemap"
            name = "Grist"
            url = "https://example.com/sitemap.xml"
            recency = "url_only"

            [[sections.sources]]
            type = "email"
            name = "Climate list"
            address = "list@example.com"
            "#,
        )
        .unwrap();

        settings.validate().unwrap();
        assert_eq!(settings.fetch.concurrency, 2);
        assert_eq!(settings.fetch.page_timeout_secs, 30);

        let section = &settings.sections[0];
        assert_eq!(section.kind, SectionKind::Articles);
        assert_eq!(section.limits.max_items, Some(10));
        assert_eq!(section.limits.max_body_chars, 4000);
        assert_eq!(section.limits.truncation, Truncation::OldestFirst);
        assert_eq!(section.sources.len(), 3);
        assert_eq!(section.sources[0].source_type(), SourceType::Rss);

        match &section.sources[1] {
            SourceDescriptor::Sitemap(site) => assert_eq!(site.recency, Recency::UrlOnly),
            other => panic!("expected sitemap, got {:?}", other),
        }
        match &section.sources[2] {
            SourceDescriptor::Email(filter) => assert_eq!(filter.mailbox, "INBOX"),
            other => panic!("expected email, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_section_names_rejected() {
        let settings = Settings::from_toml_str(
            r#"
            [[sections]]
            name = "AI"

            [[sections]]
            name = "AI"
            "#,
        )
        .unwrap();

        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_invalid_selector_rejected_at_load() {
        let settings = Settings::from_toml_str(
            r#"
            [[sections]]
            name = "AI"

            [[sections.sources]]
            type = "sitemap"
            name = "Broken"
            url = "https://example.com/sitemap.xml"
            body_selector = "div.entry[["
            "#,
        )
        .unwrap();

        let message = format!("{:#}", settings.validate().unwrap_err());
        assert!(message.contains("Section AI, source Broken"), "{}", message);
        assert!(message.contains("div.entry[["), "{}", message);
    }

    #[test]
    fn test_invalid_chart_color_rejected_at_load() {
        let mut settings = Settings::default();
        settings.chart.grid_color = "light grey".to_string();
        let message = format!("{:#}", settings.validate().unwrap_err());
        assert!(message.contains("chart.grid_color"), "{}", message);
    }

    #[test]
    fn test_rss_follow_link_options_from_toml() {
        let settings = Settings::from_toml_str(
            r#"
            [[sections]]
            name = "AI"

            [[sections.sources]]
            type = "rss"
            name = "Rundown"
            url = "https://example.com/feed"
            follow_link = true
            content_selector = "div#content-blocks"
            strip_selectors = ["div.wp-caption", "figure"]
            "#,
        )
        .unwrap();

        settings.validate().unwrap();
        match &settings.sections[0].sources[0] {
            SourceDescriptor::Rss(feed) => {
                assert!(feed.follow_link);
                assert_eq!(feed.selectors().count(), 3);
            }
            other => panic!("expected rss, got {:?}", other),
        }
    }

    #[test]
    fn test_default_settings_keep_stock_charts_only() {
        let tickers: Vec<String> = Settings::default()
            .charts
            .into_iter()
            .map(|c| c.ticker)
            .collect();
        assert_eq!(tickers, vec!["BYND", "OTLY", "^GSPC"]);
    }

    #[test]
    fn test_unknown_source_type_rejected() {
        let result = Settings::from_toml_str(
            r#"
            [[sections]]
            name = "AI"

            [[sections.sources]]
            type = "podcast"
            name = "x"
            url = "https://example.com"
            "#,
        );
        assert!(result.is_err());
    }
}
