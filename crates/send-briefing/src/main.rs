use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use shared::{
    io, logging, pipeline, ClaudeSummarizer, Config, ContentExtractor, ImageGenerator,
    ImapMailbox, MarketDataSource, RunOptions, Services, Settings, SmtpMailer,
    StabilityImageGenerator, YahooFinance,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "send-briefing")]
#[command(about = "Collect the day's news, summarize it per section, and email the briefing")]
struct Args {
    /// Send to the full distribution list instead of only the developer address
    #[arg(long)]
    send_to_everyone: bool,

    /// Render and save the newsletter without sending it
    #[arg(long)]
    dry_run: bool,

    /// Settings file (defaults to <config dir>/daily-briefing/briefing.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory for daily_briefing.log and prompt_response.log
    #[arg(long, value_name = "PATH")]
    log_dir: Option<PathBuf>,
}

fn build_services(config: &Config, settings: &Settings) -> Result<Services> {
    let pages = Arc::new(ContentExtractor::new(&settings.fetch)?);
    let mailbox = Arc::new(ImapMailbox::new(
        &settings.mail,
        &config.email_username,
        &config.email_password,
    ));
    let summarizer = Arc::new(ClaudeSummarizer::new(
        config.anthropic_api_key.clone(),
        &settings.style,
    )?);

    let images: Option<Arc<dyn ImageGenerator>> = match &config.stability_api_key {
        Some(key) => Some(Arc::new(StabilityImageGenerator::new(key.clone())?)),
        None => {
            warn!("STABILITY_API_KEY not set, sections will have no illustrations");
            None
        }
    };

    let market: Option<Arc<dyn MarketDataSource>> = if settings.charts.is_empty() {
        None
    } else {
        Some(Arc::new(YahooFinance::new(&settings.fetch.user_agent)?))
    };

    let mailer = Arc::new(SmtpMailer::new(
        &settings.mail,
        &config.email_username,
        &config.email_password,
    )?);

    Ok(Services {
        pages,
        mailbox,
        summarizer,
        images,
        market,
        mailer,
    })
}

async fn run(args: Args) -> Result<()> {
    let config = Config::from_env()?;
    let settings = Settings::load(args.config.as_deref())?;
    let services = build_services(&config, &settings).context("Failed to set up services")?;

    let options = RunOptions {
        send_to_everyone: args.send_to_everyone,
        dry_run: args.dry_run,
        output_dir: None,
        now: Utc::now(),
    };

    let report = pipeline::run(&config, &settings, &services, &options).await?;

    info!(
        items = report.items_collected,
        ready = report.sections_ready,
        degraded = report.degraded_sections.len(),
        images = report.images,
        charts = report.charts,
        "Briefing built"
    );
    if !report.degraded_sections.is_empty() {
        warn!(sections = ?report.degraded_sections, "Some sections have no summary");
    }
    match (&report.saved_to, report.recipient_count()) {
        (Some(path), _) => info!(path = %path.display(), "Newsletter saved"),
        (None, n) => info!(recipients = n, "Briefing delivered"),
    }

    Ok(())
}

fn init_logging(log_dir: Option<PathBuf>) -> Result<()> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => io::default_logs_dir()?,
    };
    logging::init(&log_dir)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.log_dir.clone()) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
