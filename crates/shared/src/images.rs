use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

const STABILITY_API_URL: &str = "https://api.stability.ai/v2beta/stable-image/generate/ultra";
const ASPECT_RATIO: &str = "16:9";
const OUTPUT_FORMAT: &str = "png";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage>;
}

/// Illustration prompt for a section's lead story
pub fn image_prompt(headline: &str, summary: &str) -> String {
    format!(
        "Editorial illustration for a newsletter story. {} {} \
         Clean, modern, flat colours. Do not include any text, letters or logos.",
        headline.trim(),
        summary.trim()
    )
}

pub struct StabilityImageGenerator {
    client: Client,
    api_key: String,
}

impl StabilityImageGenerator {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, api_key })
    }
}

#[async_trait]
impl ImageGenerator for StabilityImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage> {
        let form = Form::new()
            .text("prompt", prompt.to_string())
            .text("aspect_ratio", ASPECT_RATIO)
            .text("output_format", OUTPUT_FORMAT);

        let response = self
            .client
            .post(STABILITY_API_URL)
            .bearer_auth(&self.api_key)
            .header("accept", "image/*")
            .multipart(form)
            .send()
            .await
            .context("Failed to send request to Stability API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            anyhow::bail!("Stability API error ({}): {}", status, error_text);
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read image bytes")?
            .to_vec();

        if bytes.is_empty() {
            anyhow::bail!("Stability API returned an empty image");
        }

        info!(bytes = bytes.len(), "Generated image");
        Ok(GeneratedImage {
            bytes,
            mime_type: format!("image/{}", OUTPUT_FORMAT),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_prompt_forbids_text() {
        let prompt = image_prompt(" Oat Milk Sales Soar ", "Oatly beat estimates.");
        assert!(prompt.contains("Oat Milk Sales Soar Oatly beat estimates."));
        assert!(prompt.contains("Do not include any text"));
    }
}
