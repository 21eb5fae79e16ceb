//! Maintenance refresh of existing catalog entries
//!
//! Unlike ingestion, which is strictly sequential, refresh may check a batch
//! of known entries concurrently: each check is a single cheap commit-date
//! request. Batches run `concurrency` requests at a time and every batch is
//! followed by a delay so a large catalog cannot exhaust the rate budget.
//!
//! When an entry's commit date has moved, the stored date is updated and its
//! summary row is dropped - the summary gate's backfill path regenerates it
//! on the next scrape of that repository.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::time::Duration;

use crate::db::{CatalogEntry, Database};
use crate::github::GitHubClient;
use crate::scrape::parse_repo_url;

#[derive(Clone)]
pub struct RefreshOptions {
    pub batch_size: usize,
    pub concurrency: usize,
    pub limit: Option<usize>,
    pub batch_delay_ms: u64,
    pub debug: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            batch_size: 25,
            concurrency: 4,
            limit: None,
            batch_delay_ms: 2000,
            debug: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct RefreshResult {
    pub checked: usize,
    pub updated: usize,
    pub failed: usize,
    pub batches: usize,
}

/// Re-check stored entries against their repositories' latest commit dates
pub async fn refresh_catalog(
    client: &GitHubClient,
    db: &Database,
    opts: &RefreshOptions,
) -> Result<RefreshResult> {
    let mut result = RefreshResult::default();
    let limit = opts.limit.unwrap_or(usize::MAX);
    let mut offset = 0usize;

    loop {
        if result.checked >= limit {
            break;
        }
        let batch_size = opts.batch_size.min(limit - result.checked);
        let entries = db.list_entries(batch_size, offset)?;
        if entries.is_empty() {
            break;
        }
        offset += entries.len();
        let exhausted = entries.len() < batch_size;
        result.batches += 1;

        let checks: Vec<(CatalogEntry, Result<Option<chrono::DateTime<chrono::Utc>>>)> =
            stream::iter(entries.into_iter().map(|entry| async move {
                let fetched = match parse_repo_url(&entry.repository_url) {
                    Ok((owner, repo)) => client.get_last_commit_date(&owner, &repo).await,
                    Err(e) => Err(e.into()),
                };
                (entry, fetched)
            }))
            .buffer_unordered(opts.concurrency.max(1))
            .collect()
            .await;

        for (entry, fetched) in checks {
            result.checked += 1;
            match fetched {
                Ok(Some(date)) if date != entry.last_commit_at => {
                    db.update_commit_date(entry.id, date)?;
                    db.clear_summary(entry.id)?;
                    result.updated += 1;
                    eprintln!("  \x1b[32m~\x1b[0m {} has new commits", entry.name);
                }
                Ok(Some(_)) => {
                    if opts.debug {
                        eprintln!("  \x1b[90m{} unchanged\x1b[0m", entry.name);
                    }
                }
                Ok(None) => {
                    result.failed += 1;
                    eprintln!("  \x1b[33m!\x1b[0m no commit date for {}", entry.name);
                }
                Err(e) => {
                    result.failed += 1;
                    eprintln!("  \x1b[33m!\x1b[0m {}: {}", entry.name, e);
                }
            }
        }

        if exhausted {
            break;
        }

        // The inter-batch delay is part of the refresh contract, not an
        // optimization knob
        tokio::time::sleep(Duration::from_millis(opts.batch_delay_ms)).await;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_catalog_refreshes_to_zero() {
        let db = Database::open_in_memory().unwrap();
        let client = GitHubClient::new(None);
        let result = refresh_catalog(&client, &db, &RefreshOptions::default())
            .await
            .unwrap();
        assert_eq!(result.checked, 0);
        assert_eq!(result.batches, 0);
    }

    #[tokio::test]
    async fn test_limit_zero_checks_nothing() {
        let db = Database::open_in_memory().unwrap();
        let client = GitHubClient::new(None);
        let opts = RefreshOptions {
            limit: Some(0),
            ..Default::default()
        };
        let result = refresh_catalog(&client, &db, &opts).await.unwrap();
        assert_eq!(result.checked, 0);
    }
}
