use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "daily-briefing";

fn app_data_dir(child: &str) -> Result<PathBuf> {
    let dir = dirs::data_local_dir()
        .context("Could not determine local data directory")?
        .join(APP_DIR)
        .join(child);

    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    Ok(dir)
}

/// Where dry runs leave their rendered HTML
pub fn default_newsletters_dir() -> Result<PathBuf> {
    app_data_dir("newsletters")
}

pub fn default_logs_dir() -> Result<PathBuf> {
    app_data_dir("logs")
}

pub fn newsletter_filename(date: NaiveDate) -> String {
    format!("briefing_{}.html", date.format("%Y-%m-%d"))
}

/// Save a rendered newsletter to the default directory
pub fn save_newsletter(html: &str, date: NaiveDate) -> Result<PathBuf> {
    let dir = default_newsletters_dir()?;
    save_newsletter_in(&dir, html, date)
}

/// Save a rendered newsletter under `dir`, replacing any earlier run for the same date
pub fn save_newsletter_in(dir: &Path, html: &str, date: NaiveDate) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let filepath = dir.join(newsletter_filename(date));
    fs::write(&filepath, html)
        .with_context(|| format!("Failed to write newsletter: {}", filepath.display()))?;

    Ok(filepath)
}
