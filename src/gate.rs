//! Summary gate: the cost-control decision for the metered AI service
//!
//! A summary is (re)generated only when the catalog entry is new, its commit
//! timestamp moved since the last ingestion, or no summary exists yet. This
//! gate is the only thing standing between a scheduled scrape run and an
//! unbounded summarization bill, so the decision table is tested exhaustively.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::catalog::CatalogView;

/// How a scraped repository relates to the stored catalog entry, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitStatus {
    /// No catalog entry exists for this repository yet
    pub is_new: bool,
    /// The stored commit timestamp differs from the freshly scraped one
    pub should_update: bool,
    pub existing_id: Option<String>,
}

impl CommitStatus {
    pub fn new_entry() -> Self {
        Self {
            is_new: true,
            should_update: false,
            existing_id: None,
        }
    }

    pub fn existing(id: String, stored: DateTime<Utc>, scraped: DateTime<Utc>) -> Self {
        Self {
            is_new: false,
            should_update: stored != scraped,
            existing_id: Some(id),
        }
    }
}

/// Decide whether the (expensive) summary must be (re)generated for this
/// repository on this run.
pub async fn should_generate_summary(
    view: &dyn CatalogView,
    repository_url: &str,
    scraped_commit_at: DateTime<Utc>,
) -> Result<bool> {
    let status = view.commit_status(repository_url, scraped_commit_at).await?;

    if status.is_new || status.should_update {
        return Ok(true);
    }

    match &status.existing_id {
        // Backfill: entry exists and is current, but was never summarized
        Some(id) => Ok(!view.has_summary(id).await?),
        None => Ok(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct FakeView {
        status: CommitStatus,
        has_summary: bool,
    }

    #[async_trait]
    impl CatalogView for FakeView {
        async fn commit_status(
            &self,
            _repository_url: &str,
            _scraped_commit_at: DateTime<Utc>,
        ) -> Result<CommitStatus> {
            Ok(self.status.clone())
        }

        async fn has_summary(&self, _catalog_id: &str) -> Result<bool> {
            Ok(self.has_summary)
        }
    }

    fn ts(y: i32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_new_entry_generates() {
        let view = FakeView {
            status: CommitStatus::new_entry(),
            has_summary: false,
        };
        assert!(should_generate_summary(&view, "https://github.com/a/b", ts(2025))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_changed_commit_generates() {
        let view = FakeView {
            status: CommitStatus::existing("7".into(), ts(2024), ts(2025)),
            has_summary: true,
        };
        assert!(should_generate_summary(&view, "https://github.com/a/b", ts(2025))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_missing_summary_generates() {
        let view = FakeView {
            status: CommitStatus::existing("7".into(), ts(2025), ts(2025)),
            has_summary: false,
        };
        assert!(should_generate_summary(&view, "https://github.com/a/b", ts(2025))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unchanged_and_summarized_skips() {
        // Only combination where the gate says no
        let view = FakeView {
            status: CommitStatus::existing("7".into(), ts(2025), ts(2025)),
            has_summary: true,
        };
        assert!(!should_generate_summary(&view, "https://github.com/a/b", ts(2025))
            .await
            .unwrap());
    }

    #[test]
    fn test_commit_status_existing_detects_change() {
        let s = CommitStatus::existing("1".into(), ts(2024), ts(2025));
        assert!(s.should_update);
        let s = CommitStatus::existing("1".into(), ts(2025), ts(2025));
        assert!(!s.should_update);
    }
}
