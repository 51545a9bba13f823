use anyhow::{anyhow, Context};
use async_trait::async_trait;
use log::trace;
use regex::Regex;

use crate::extract::{ExtractionError, Extractor};

/// Text of the first counter `<span>` inside the first link of the `<nav>` following the
/// `id="repos"` container, which is where a GitHub stargazers page shows its star count.
pub const DEFAULT_VALUE_PATTERN: &str =
    r#"(?s)id="repos".*?<nav\b.*?<a\b[^>]*>.*?<span\b[^>]*>\s*([^<]*?)\s*</span>"#;

/// Default extractor: plain HTTP GET followed by a regular expression whose first capture
/// group is the value.  Likely this is what you want unless the page needs a real browser.
#[derive(Debug, Clone)]
pub struct HttpExtractor {
    client: reqwest::Client,
    pattern: Regex,
}

impl HttpExtractor {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_pattern(DEFAULT_VALUE_PATTERN)
    }

    /// Use a custom pattern.  It must contain at least one capture group; the first one
    /// becomes the extracted value.
    pub fn with_pattern(pattern: &str) -> anyhow::Result<Self> {
        let pattern =
            Regex::new(pattern).with_context(|| format!("Invalid value pattern {pattern:?}"))?;
        if pattern.captures_len() < 2 {
            return Err(anyhow!("Value pattern {pattern} has no capture group"));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Unable to build HTTP client")?;
        Ok(Self { client, pattern })
    }

    /// Pull the value out of an already-downloaded page body.
    pub fn extract_from(&self, body: &str) -> Result<String, ExtractionError> {
        self.pattern
            .captures(body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or(ExtractionError::NotFound)
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn fetch(&self, url: &str) -> Result<String, ExtractionError> {
        let response = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        trace!("Fetched {} bytes from {url}", body.len());
        self.extract_from(&body)
    }
}

impl From<reqwest::Error> for ExtractionError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
