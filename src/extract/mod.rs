use std::time::Duration;

use async_trait::async_trait;
use tokio::time;

pub use http::{HttpExtractor, DEFAULT_VALUE_PATTERN};

mod http;

/// Generalization of "go look at this page and tell me the number on it".  The watch loop
/// only ever needs one scalar per URL, which is handed back as the raw text that appeared
/// on the page so that comparisons stay exact.
#[async_trait]
pub trait Extractor: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> Result<String, ExtractionError>;
}

/// Reasons a current value could not be obtained.  For the watch loop every variant means
/// the same thing ("no current value this time") but they are kept apart for logging.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// The page was retrieved but did not contain the expected field.
    #[error("value not found on page")]
    NotFound,

    /// Network failure, bad URL, or a non-success HTTP status.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Bound a single fetch so that a hung peer cannot stall its caller.  Elapsed time is folded
/// into [`ExtractionError::Timeout`].
pub async fn fetch_with_timeout(
    extractor: &dyn Extractor,
    url: &str,
    timeout: Duration,
) -> Result<String, ExtractionError> {
    match time::timeout(timeout, extractor.fetch(url)).await {
        Ok(result) => result,
        Err(_) => Err(ExtractionError::Timeout(timeout)),
    }
}
