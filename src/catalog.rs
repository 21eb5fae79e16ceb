//! Capability interfaces consumed by the ingestion pipeline
//!
//! The core has no dependency on any particular persistence technology:
//! duplicate checking, saving and summary storage are injected behind these
//! traits. Each call is a single round-trip owned entirely by the
//! collaborator; the core never retries a save.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::gate::CommitStatus;
use crate::scrape::ScrapedLibrary;

/// Has a library with this script identifier already been catalogued?
/// Safe to call once per candidate, in any order.
#[async_trait]
pub trait DuplicateChecker: Send + Sync {
    async fn is_duplicate(&self, script_id: &str) -> Result<bool>;
}

/// Persists one scraped record. `generate_summary` tells the store whether a
/// summary (re)generation follows so it can be handled in the same
/// transaction-adjacent step. Returns the catalog id of the saved entry.
#[async_trait]
pub trait CatalogWriter: Send + Sync {
    async fn save(&self, library: &ScrapedLibrary, generate_summary: bool) -> Result<String>;
}

/// Read-side lookups backing the summary gate
#[async_trait]
pub trait CatalogView: Send + Sync {
    /// Compare the freshly scraped commit timestamp against the stored entry
    /// for this repository, if any
    async fn commit_status(
        &self,
        repository_url: &str,
        scraped_commit_at: DateTime<Utc>,
    ) -> Result<CommitStatus>;

    /// Does a summary record exist for this catalog entry?
    async fn has_summary(&self, catalog_id: &str) -> Result<bool>;
}

/// A generated summary, ready to persist
#[derive(Debug, Clone)]
pub struct SummaryRecord {
    pub source_url: String,
    pub body: String,
    pub model: String,
    pub generated_at: DateTime<Utc>,
}

/// Opaque text-generation service. Errors here are never fatal to an
/// ingestion - a catalog entry without a summary is acceptable.
#[async_trait]
pub trait SummaryService: Send + Sync {
    async fn summarize(&self, source_url: &str) -> Result<SummaryRecord>;
}

/// Persists a generated summary against an existing catalog entry
#[async_trait]
pub trait SummaryWriter: Send + Sync {
    async fn save_summary(&self, catalog_id: &str, summary: &SummaryRecord) -> Result<()>;
}
