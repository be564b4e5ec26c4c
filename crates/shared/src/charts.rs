use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use image::{ImageFormat, RgbImage};
use plotters::prelude::*;
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;

use crate::config::{ChartSpec, ChartStyle};
use crate::error::ChartError;

const MARGIN: u32 = 20;
const MIN_SIDE: u32 = 2 * MARGIN + 10;
const GRID_LINES: usize = 5;

/// Daily closing prices for one ticker, oldest first
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    pub ticker: String,
    pub display_name: String,
    pub points: Vec<(DateTime<Utc>, f64)>,
}

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn series(&self, chart: &ChartSpec, range: &str) -> Result<PriceSeries>;
}

#[derive(Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Deserialize)]
struct Quote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Parse a Yahoo Finance v8 chart response. Missing closes are skipped.
pub fn parse_chart_response(json: &str, chart: &ChartSpec) -> Result<PriceSeries> {
    let response: ChartResponse =
        serde_json::from_str(json).context("Failed to parse chart response")?;

    if let Some(error) = response.chart.error.filter(|e| !e.is_null()) {
        anyhow::bail!("Yahoo Finance error for {}: {}", chart.ticker, error);
    }

    let result = response
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .with_context(|| format!("No chart data for {}", chart.ticker))?;

    let closes = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();

    let points = result
        .timestamp
        .into_iter()
        .zip(closes)
        .filter_map(|(ts, close)| Some((DateTime::from_timestamp(ts, 0)?, close?)))
        .collect();

    Ok(PriceSeries {
        ticker: chart.ticker.clone(),
        display_name: chart.display_name.clone(),
        points,
    })
}

pub struct YahooFinance {
    client: Client,
}

impl YahooFinance {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl MarketDataSource for YahooFinance {
    async fn series(&self, chart: &ChartSpec, range: &str) -> Result<PriceSeries> {
        let url = format!(
            "https://query1.finance.yahoo.com/v8/finance/chart/{}?range={}&interval=1d",
            urlencoding::encode(&chart.ticker),
            urlencoding::encode(range)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send request to Yahoo Finance")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Yahoo Finance returned HTTP {} for {}", status, chart.ticker);
        }

        let body = response.text().await.context("Failed to read chart response")?;
        parse_chart_response(&body, chart)
    }
}

/// Parse a `#rrggbb` or `#rgb` colour.
pub fn parse_color(value: &str) -> Result<RGBColor, ChartError> {
    let invalid = || ChartError::InvalidColor(value.to_string());
    let hex = value.trim().strip_prefix('#').ok_or_else(invalid)?;
    let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());

    if !hex.is_ascii() {
        return Err(invalid());
    }

    match hex.len() {
        6 => Ok(RGBColor(channel(&hex[0..2])?, channel(&hex[2..4])?, channel(&hex[4..6])?)),
        3 => {
            let expand = |i: usize| channel(&hex[i..=i].repeat(2));
            Ok(RGBColor(expand(0)?, expand(1)?, expand(2)?))
        }
        _ => Err(invalid()),
    }
}

/// One-line text shown above a chart, e.g. `S&P 500: 6050.25 (+3.1% over 1y)`
pub fn chart_caption(series: &PriceSeries, range: &str) -> String {
    let Some((first, last)) = series.points.first().zip(series.points.last()) else {
        return series.display_name.clone();
    };
    let close = format!("{}: {:.2}", series.display_name, last.1);
    if first.1 == 0.0 {
        return close;
    }
    format!("{} ({:+.1}% over {})", close, (last.1 - first.1) / first.1 * 100.0, range)
}

fn render_error<E: std::fmt::Display>(e: E) -> ChartError {
    ChartError::Render(e.to_string())
}

/// Draw a line chart of `series` as a PNG.
///
/// Labels are left to the caption in the email body, so the image carries no text.
pub fn render_chart(series: &PriceSeries, style: &ChartStyle) -> Result<Vec<u8>, ChartError> {
    if series.points.len() < 2 {
        return Err(ChartError::NotEnoughData {
            ticker: series.ticker.clone(),
            points: series.points.len(),
        });
    }
    if series.points.iter().any(|(_, v)| !v.is_finite()) {
        return Err(ChartError::NonFinite(series.ticker.clone()));
    }
    if style.width < MIN_SIDE || style.height < MIN_SIDE {
        return Err(ChartError::Render(format!(
            "chart size {}x{} is below {}px",
            style.width, style.height, MIN_SIDE
        )));
    }

    let line = parse_color(&style.line_color)?;
    let grid = parse_color(&style.grid_color)?;
    let background = parse_color(&style.background_color)?;

    let (mut lo, mut hi) = series
        .points
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), (_, v)| (lo.min(*v), hi.max(*v)));
    if (hi - lo).abs() < f64::EPSILON {
        lo -= 1.0;
        hi += 1.0;
    }
    let pad = (hi - lo) * 0.05;
    lo -= pad;
    hi += pad;

    let points: Vec<(i64, f64)> = series
        .points
        .iter()
        .map(|(t, v)| (t.timestamp(), *v))
        .collect();
    let t0 = points[0].0;
    let t1 = points[points.len() - 1].0.max(t0 + 1);
    let last = points[points.len() - 1];

    let (width, height) = (style.width, style.height);
    let mut pixels = vec![0u8; width as usize * height as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut pixels, (width, height)).into_drawing_area();
        root.fill(&background).map_err(render_error)?;

        let mut chart = ChartBuilder::on(&root)
            .margin(MARGIN)
            .build_cartesian_2d(t0..t1, lo..hi)
            .map_err(render_error)?;

        for i in 0..=GRID_LINES {
            let value = lo + (hi - lo) * i as f64 / GRID_LINES as f64;
            chart
                .draw_series(std::iter::once(PathElement::new(
                    vec![(t0, value), (t1, value)],
                    grid.stroke_width(1),
                )))
                .map_err(render_error)?;
        }

        chart
            .draw_series(LineSeries::new(points, line.stroke_width(2)))
            .map_err(render_error)?;
        chart
            .draw_series(std::iter::once(Circle::new(last, 4, line.filled())))
            .map_err(render_error)?;

        root.present().map_err(render_error)?;
    }

    let image = RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| ChartError::Render("pixel buffer has the wrong size".to_string()))?;
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(render_error)?;
    Ok(png)
}
