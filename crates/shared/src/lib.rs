// Public modules
pub mod briefing;
pub mod charts;
pub mod config;
pub mod delivery;
pub mod error;
pub mod extractor;
pub mod images;
pub mod io;
pub mod logging;
pub mod manager;
pub mod models;
pub mod pipeline;
pub mod sources;
pub mod summarizer;
pub mod window;

// Re-export commonly used types
pub use briefing::{Briefing, BriefingGenerator, BriefingSection, InlineImage, SectionOutcome};
pub use charts::{MarketDataSource, PriceSeries, YahooFinance};
pub use config::{Config, SectionConfig, Settings, SourceDescriptor};
pub use delivery::{Mailer, OutgoingEmail, Recipients, SmtpMailer};
pub use error::{ChartError, SourceError, SummaryError};
pub use extractor::{ContentExtractor, PageFetcher};
pub use images::{GeneratedImage, ImageGenerator, StabilityImageGenerator};
pub use io::{default_logs_dir, default_newsletters_dir, save_newsletter};
pub use manager::ContentManager;
pub use models::{CollectedSections, ContentItem, SectionContent, SourceType};
pub use pipeline::{run, RunOptions, RunReport, Services};
pub use sources::{ImapMailbox, MailboxClient, RawMessage};
pub use summarizer::{ClaudeSummarizer, SectionResult, SectionSummarizer};
pub use window::TimeWindow;
