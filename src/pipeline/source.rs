//! Record source abstraction for feed ingestion.
//!
//! Every feed (USGS, POTA, SOTA, NWS, calendar) implements [`RecordSource`]
//! and hands the orchestrator already-normalized [`Record`]s. A failing
//! source only costs its own records; the run continues with the rest.

use crate::types::Record;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

/// One source failed. Always recovered by the orchestrator.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("could not decode feed payload: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Where records come from.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Human-readable name for logging ("USGS", "POTA", ...).
    fn name(&self) -> &str;

    /// Fetch and normalize one batch of records.
    async fn fetch(&self) -> Result<Vec<Record>, FetchError>;
}

/// Fetch from every source in order, treating failures as empty.
///
/// Returns the records plus the names of the sources that failed.
pub async fn collect(sources: &[Box<dyn RecordSource>]) -> (Vec<Record>, Vec<String>) {
    let mut records = Vec::new();
    let mut failed = Vec::new();
    for source in sources {
        match source.fetch().await {
            Ok(batch) => {
                info!(source = source.name(), count = batch.len(), "Fetched records");
                records.extend(batch);
            }
            Err(e) => {
                warn!(source = source.name(), error = %e, "Source failed, continuing without it");
                failed.push(source.name().to_string());
            }
        }
    }
    (records, failed)
}

// ============================================================================
// Static Source (pre-loaded records)
// ============================================================================

/// Yields a fixed batch of records. Used for replays and tests.
pub struct StaticSource {
    name: String,
    records: Vec<Record>,
}

impl StaticSource {
    pub fn new(name: &str, records: Vec<Record>) -> Self {
        Self {
            name: name.to_string(),
            records,
        }
    }
}

#[async_trait]
impl RecordSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<Record>, FetchError> {
        Ok(self.records.clone())
    }
}

/// Always fails with a decode error.
pub struct FailingSource {
    name: String,
}

impl FailingSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl RecordSource for FailingSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<Record>, FetchError> {
        Err(FetchError::Decode(format!("{} is unavailable", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Source};
    use chrono::Utc;

    #[tokio::test]
    async fn failed_source_counts_as_empty() {
        let sources: Vec<Box<dyn RecordSource>> = vec![
            Box::new(StaticSource::new(
                "POTA",
                vec![Record::new("K6ABC", Source::Pota, Category::Hf, Utc::now())],
            )),
            Box::new(FailingSource::new("SOTA")),
        ];
        let (records, failed) = collect(&sources).await;
        assert_eq!(records.len(), 1);
        assert_eq!(failed, vec!["SOTA".to_string()]);
    }
}
