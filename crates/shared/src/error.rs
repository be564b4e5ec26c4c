use std::time::Duration;

/// Failure of a single configured source. The content manager logs these and
/// treats the source as having produced nothing.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("run deadline exceeded")]
    Deadline,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("mailbox authentication failed: {0}")]
    Auth(String),

    #[error("mailbox error: {0}")]
    Mailbox(String),
}

/// Failure to turn a section's items into a validated structured result.
#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("response did not match the expected schema: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("response failed validation: {0}")]
    Validation(String),

    #[error("timed out")]
    Timeout,
}

#[derive(Debug, thiserror::Error)]
pub enum ChartError {
    #[error("not enough data points to draw {ticker} ({points})")]
    NotEnoughData { ticker: String, points: usize },

    #[error("series for {0} contains non-finite values")]
    NonFinite(String),

    #[error("invalid colour {0:?}, expected #rrggbb")]
    InvalidColor(String),

    #[error("failed to draw chart: {0}")]
    Render(String),
}
