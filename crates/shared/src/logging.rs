use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Target used for full prompt, response and rendered-HTML records
pub const PROMPT_TARGET: &str = "prompts";

pub const RUN_LOG: &str = "daily_briefing.log";
pub const PROMPT_LOG: &str = "prompt_response.log";

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}

/// RUST_LOG if set, otherwise info. Prompt records never reach this filter's layer.
fn run_filter() -> Result<EnvFilter> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    Ok(filter.add_directive(format!("{}=off", PROMPT_TARGET).parse()?))
}

/// Console plus two files under `log_dir`: the run log and the prompt log.
pub fn init(log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let run_file = open_append(&log_dir.join(RUN_LOG))?;
    let prompt_file = open_append(&log_dir.join(PROMPT_LOG))?;

    let console = fmt::layer().compact().with_filter(run_filter()?);

    let run_log = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(run_file))
        .with_filter(run_filter()?);

    let prompt_log = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(prompt_file))
        .with_filter(Targets::new().with_target(PROMPT_TARGET, Level::INFO));

    tracing_subscriber::registry()
        .with(console)
        .with(run_log)
        .with(prompt_log)
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(())
}
