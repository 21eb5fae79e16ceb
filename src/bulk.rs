//! Bulk orchestration of the discovery-and-ingestion pipeline
//!
//! Drives search pages sequentially and repositories within a page
//! sequentially - the simplest schedule that respects the shared API rate
//! budget. Per candidate: scrape, staleness filter, duplicate check, summary
//! gate, save, then conditional summary generation. A failing repository
//! never aborts its page; a failing page aborts only the pages after it.

use anyhow::{bail, Result};
use chrono::Utc;
use std::time::Duration;

use crate::catalog::{CatalogView, CatalogWriter, DuplicateChecker, SummaryService, SummaryWriter};
use crate::fmt::{format_age, format_stars};
use crate::gate;
use crate::github::{SortOption, PAGE_DELAY_MS};
use crate::scrape::{ScrapeError, ScrapeResult, ScriptSource};

/// Options for one orchestrated run. The optional steps of the pipeline are
/// toggled here rather than through separate orchestrator variants.
#[derive(Clone)]
pub struct BulkOptions {
    pub start_page: u32,
    pub end_page: u32,
    pub per_page: u32,
    pub sort: SortOption,
    /// Repositories whose last commit is older than this are skipped silently
    pub max_age_years: i64,
    pub generate_summaries: bool,
    pub request_delay_ms: u64,
    pub page_delay_ms: u64,
    pub debug: bool,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            start_page: 1,
            end_page: 1,
            per_page: 30,
            sort: SortOption::BestMatch,
            max_age_years: 5,
            generate_summaries: true,
            request_delay_ms: 1000,
            page_delay_ms: PAGE_DELAY_MS,
            debug: false,
        }
    }
}

/// External summary generation, wired in only when summaries are enabled
pub struct SummaryHooks<'a> {
    pub service: &'a dyn SummaryService,
    pub writer: &'a dyn SummaryWriter,
}

/// Aggregate outcome of a bulk run. `success_count + error_count` always
/// equals `results.len()`; duplicates and stale skips are tracked outside
/// `results`.
#[derive(Debug, Default)]
pub struct BulkScrapeResult {
    /// At least one repository was ingested - best-effort batch semantics
    pub success: bool,
    pub results: Vec<ScrapeResult>,
    /// Candidates considered across all searched pages
    pub total: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub duplicate_count: usize,
}

/// Run the pipeline across an inclusive page range.
///
/// Only configuration-level problems return `Err` - and only before any
/// network work begins. Everything downstream is accounted on the result.
pub async fn run_bulk_scrape(
    source: &dyn ScriptSource,
    duplicates: &dyn DuplicateChecker,
    writer: &dyn CatalogWriter,
    view: &dyn CatalogView,
    summaries: Option<SummaryHooks<'_>>,
    opts: &BulkOptions,
) -> Result<BulkScrapeResult> {
    if opts.start_page == 0 {
        bail!("page numbering starts at 1");
    }
    if opts.start_page > opts.end_page {
        bail!(
            "invalid page range: {}..{}",
            opts.start_page,
            opts.end_page
        );
    }
    if opts.per_page == 0 || opts.per_page > 100 {
        bail!("per_page must be within 1..=100, got {}", opts.per_page);
    }

    let now = Utc::now();
    let stale_cutoff = now - chrono::Duration::days(opts.max_age_years * 365);
    let mut out = BulkScrapeResult::default();

    for page in opts.start_page..=opts.end_page {
        let found = source.search_page(page, opts.per_page, opts.sort).await;
        if !found.success {
            eprintln!(
                "\x1b[31mx\x1b[0m page {} search failed: {}",
                page,
                found.error.as_deref().unwrap_or("unknown error")
            );
            break;
        }
        if found.repositories.is_empty() {
            if opts.debug {
                eprintln!("\x1b[90mpage {} empty, stopping\x1b[0m", page);
            }
            break;
        }

        eprintln!(
            "\x1b[36m..\x1b[0m page {}: {} candidates",
            page,
            found.repositories.len()
        );
        out.total += found.repositories.len();

        for (idx, repo) in found.repositories.iter().enumerate() {
            if idx > 0 && opts.request_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(opts.request_delay_ms)).await;
            }

            let library = match source.scrape(&repo.html_url).await {
                Ok(library) => library,
                Err(e) => {
                    eprintln!("  \x1b[33m!\x1b[0m {}", e);
                    out.results.push(Err(e));
                    out.error_count += 1;
                    continue;
                }
            };

            // Unmaintained repositories are excluded from ingestion, not
            // counted as failures
            if library.last_commit_at < stale_cutoff {
                if opts.debug {
                    eprintln!(
                        "  \x1b[90mskip {} (last commit {} ago)\x1b[0m",
                        repo.full_name,
                        format_age(library.last_commit_at, now)
                    );
                }
                continue;
            }

            match duplicates.is_duplicate(&library.script_id).await {
                Ok(true) => {
                    if opts.debug {
                        eprintln!(
                            "  \x1b[90mdup {} ({})\x1b[0m",
                            repo.full_name, library.script_id
                        );
                    }
                    out.duplicate_count += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    eprintln!("  \x1b[33m!\x1b[0m duplicate check failed: {}", e);
                    out.results.push(Err(ScrapeError::Api {
                        name: repo.full_name.clone(),
                        message: format!("duplicate check failed: {}", e),
                    }));
                    out.error_count += 1;
                    continue;
                }
            }

            // Gate decision happens before the save so the store learns about
            // the pending summary in the same step. An unreadable catalog errs
            // toward generating.
            let generate = if opts.generate_summaries {
                gate::should_generate_summary(view, &library.repository_url, library.last_commit_at)
                    .await
                    .unwrap_or(true)
            } else {
                false
            };

            let catalog_id = match writer.save(&library, generate).await {
                Ok(id) => id,
                Err(e) => {
                    eprintln!("  \x1b[31mx\x1b[0m save failed for {}: {}", repo.full_name, e);
                    out.results.push(Err(ScrapeError::SaveFailed {
                        name: repo.full_name.clone(),
                        message: e.to_string(),
                    }));
                    out.error_count += 1;
                    continue;
                }
            };

            eprintln!(
                "  \x1b[32mok\x1b[0m {} [{}] \x1b[33m{}\x1b[0m",
                repo.full_name,
                library.script_type.as_str(),
                format_stars(library.star_count)
            );

            // A catalog entry without a summary is acceptable; a summary
            // without a catalog entry is not. Summary failures are logged
            // and swallowed.
            if generate {
                if let Some(hooks) = &summaries {
                    match hooks.service.summarize(&library.repository_url).await {
                        Ok(summary) => {
                            if let Err(e) = hooks.writer.save_summary(&catalog_id, &summary).await {
                                eprintln!(
                                    "  \x1b[33m!\x1b[0m could not save summary for {}: {}",
                                    repo.full_name, e
                                );
                            }
                        }
                        Err(e) => {
                            eprintln!(
                                "  \x1b[33m!\x1b[0m summary generation failed for {}: {}",
                                repo.full_name, e
                            );
                        }
                    }
                }
            }

            out.success_count += 1;
            out.results.push(Ok(library));
        }

        if page < opts.end_page && opts.page_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(opts.page_delay_ms)).await;
        }
    }

    out.success = out.success_count > 0;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::CommitStatus;
    use crate::github::{RepoLicense, RepoOwner, RepoSummary, TagSearchResult};
    use crate::ident::ScriptType;
    use crate::scrape::{LibraryStatus, ScrapedLibrary};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    const ID_A: &str = "1AbCdEfGhIjKlMnOpQrStUvWxYz012345";
    const ID_B: &str = "1ZyXwVuTsRqPoNmLkJiHgFeDcBa987654";

    fn ts(y: i32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, 3, 1, 0, 0, 0).unwrap()
    }

    fn repo(full_name: &str) -> RepoSummary {
        let (owner, name) = full_name.split_once('/').unwrap();
        RepoSummary {
            full_name: full_name.to_string(),
            name: name.to_string(),
            html_url: format!("https://github.com/{}", full_name),
            description: Some("test repo".to_string()),
            stargazers_count: 42,
            owner: RepoOwner {
                login: owner.to_string(),
                html_url: format!("https://github.com/{}", owner),
            },
            license: Some(RepoLicense {
                name: "MIT License".to_string(),
                url: None,
            }),
        }
    }

    fn library(full_name: &str, script_id: &str, last_commit_at: DateTime<Utc>) -> ScrapedLibrary {
        let (owner, name) = full_name.split_once('/').unwrap();
        ScrapedLibrary {
            name: name.to_string(),
            script_id: script_id.to_string(),
            script_type: ScriptType::Library,
            repository_url: format!("https://github.com/{}", full_name),
            author_name: owner.to_string(),
            author_url: format!("https://github.com/{}", owner),
            description: Some("test repo".to_string()),
            license_name: Some("MIT License".to_string()),
            license_url: None,
            star_count: 42,
            last_commit_at,
            status: LibraryStatus::Pending,
            readme: Some(format!("Script ID: {}", script_id)),
        }
    }

    #[derive(Default)]
    struct StubSource {
        pages: HashMap<u32, Vec<RepoSummary>>,
        fail_pages: HashSet<u32>,
        outcomes: HashMap<String, ScrapeResult>,
        requested_pages: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl ScriptSource for StubSource {
        async fn search_page(&self, page: u32, _per_page: u32, _sort: SortOption) -> TagSearchResult {
            self.requested_pages.lock().unwrap().push(page);
            if self.fail_pages.contains(&page) {
                return TagSearchResult {
                    success: false,
                    error: Some("boom".to_string()),
                    ..Default::default()
                };
            }
            let repositories = self.pages.get(&page).cloned().unwrap_or_default();
            let retrieved = repositories.len();
            TagSearchResult {
                success: true,
                total_count: 40,
                retrieved,
                repositories,
                error: None,
            }
        }

        async fn scrape(&self, repository_url: &str) -> ScrapeResult {
            self.outcomes
                .get(repository_url)
                .cloned()
                .unwrap_or_else(|| {
                    Err(ScrapeError::NoIdentifier(repository_url.to_string()))
                })
        }
    }

    struct StubDup {
        ids: HashSet<String>,
    }

    #[async_trait]
    impl DuplicateChecker for StubDup {
        async fn is_duplicate(&self, script_id: &str) -> Result<bool> {
            Ok(self.ids.contains(script_id))
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        saved: Mutex<Vec<(String, bool)>>,
        fail: bool,
    }

    #[async_trait]
    impl CatalogWriter for RecordingWriter {
        async fn save(&self, library: &ScrapedLibrary, generate_summary: bool) -> Result<String> {
            if self.fail {
                bail!("disk full");
            }
            let mut saved = self.saved.lock().unwrap();
            saved.push((library.script_id.clone(), generate_summary));
            Ok(format!("cat-{}", saved.len()))
        }
    }

    struct StubView {
        status: CommitStatus,
        has_summary: bool,
    }

    impl Default for StubView {
        fn default() -> Self {
            Self {
                status: CommitStatus::new_entry(),
                has_summary: false,
            }
        }
    }

    #[async_trait]
    impl CatalogView for StubView {
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

    #[derive(Default)]
    struct StubSummaries {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl SummaryService for StubSummaries {
        async fn summarize(&self, source_url: &str) -> Result<crate::catalog::SummaryRecord> {
            self.calls.lock().unwrap().push(source_url.to_string());
            if self.fail {
                bail!("model unavailable");
            }
            Ok(crate::catalog::SummaryRecord {
                source_url: source_url.to_string(),
                body: "A useful library.".to_string(),
                model: "stub".to_string(),
                generated_at: ts(2025),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSummaryWriter {
        saved: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SummaryWriter for RecordingSummaryWriter {
        async fn save_summary(
            &self,
            catalog_id: &str,
            _summary: &crate::catalog::SummaryRecord,
        ) -> Result<()> {
            self.saved.lock().unwrap().push(catalog_id.to_string());
            Ok(())
        }
    }

    fn fast_opts() -> BulkOptions {
        BulkOptions {
            request_delay_ms: 0,
            page_delay_ms: 0,
            ..Default::default()
        }
    }

    fn two_repo_source() -> StubSource {
        let mut source = StubSource::default();
        source.pages.insert(1, vec![repo("alice/sheet-utils"), repo("bob/misc-scripts")]);
        source.outcomes.insert(
            "https://github.com/alice/sheet-utils".to_string(),
            Ok(library("alice/sheet-utils", ID_A, ts(2025))),
        );
        source.outcomes.insert(
            "https://github.com/bob/misc-scripts".to_string(),
            Err(ScrapeError::NoIdentifier("bob/misc-scripts".to_string())),
        );
        source
    }

    #[tokio::test]
    async fn test_one_success_one_failure() {
        let source = two_repo_source();
        let writer = RecordingWriter::default();
        let result = run_bulk_scrape(
            &source,
            &StubDup { ids: HashSet::new() },
            &writer,
            &StubView::default(),
            None,
            &fast_opts(),
        )
        .await
        .unwrap();

        assert!(result.success);
        assert_eq!(result.total, 2);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.duplicate_count, 0);
        assert_eq!(result.results.len(), 2);
        assert!(result.results[0].is_ok());
        assert!(result.results[1].is_err());
    }

    #[tokio::test]
    async fn test_duplicate_filtered_before_persistence() {
        let source = two_repo_source();
        let writer = RecordingWriter::default();
        let dup = StubDup {
            ids: [ID_A.to_string()].into_iter().collect(),
        };
        let result = run_bulk_scrape(&source, &dup, &writer, &StubView::default(), None, &fast_opts())
            .await
            .unwrap();

        assert_eq!(result.duplicate_count, 1);
        assert_eq!(result.success_count, 0);
        assert_eq!(result.error_count, 1);
        // The duplicate is not recorded as a failure-with-data
        assert_eq!(result.results.len(), 1);
        assert!(result.results[0].is_err());
        assert!(writer.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_first_page_returns_immediately() {
        let source = StubSource::default();
        let result = run_bulk_scrape(
            &source,
            &StubDup { ids: HashSet::new() },
            &RecordingWriter::default(),
            &StubView::default(),
            None,
            &fast_opts(),
        )
        .await
        .unwrap();

        assert!(!result.success);
        assert_eq!(result.total, 0);
        assert!(result.results.is_empty());
    }

    #[tokio::test]
    async fn test_stale_repository_skipped_silently() {
        let mut source = StubSource::default();
        source.pages.insert(1, vec![repo("old/stale-lib")]);
        source.outcomes.insert(
            "https://github.com/old/stale-lib".to_string(),
            Ok(library("old/stale-lib", ID_A, ts(2010))),
        );

        let writer = RecordingWriter::default();
        let result = run_bulk_scrape(
            &source,
            &StubDup { ids: HashSet::new() },
            &writer,
            &StubView::default(),
            None,
            &fast_opts(),
        )
        .await
        .unwrap();

        assert_eq!(result.success_count, 0);
        assert_eq!(result.error_count, 0);
        assert_eq!(result.duplicate_count, 0);
        assert!(result.results.is_empty());
        assert!(writer.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_counts_invariant_with_mixed_outcomes() {
        let mut source = StubSource::default();
        source.pages.insert(
            1,
            vec![
                repo("alice/sheet-utils"),
                repo("bob/misc-scripts"),
                repo("carol/dup-lib"),
            ],
        );
        source.outcomes.insert(
            "https://github.com/alice/sheet-utils".to_string(),
            Ok(library("alice/sheet-utils", ID_A, ts(2025))),
        );
        source.outcomes.insert(
            "https://github.com/bob/misc-scripts".to_string(),
            Err(ScrapeError::NoIdentifier("bob/misc-scripts".to_string())),
        );
        source.outcomes.insert(
            "https://github.com/carol/dup-lib".to_string(),
            Ok(library("carol/dup-lib", ID_B, ts(2025))),
        );

        let dup = StubDup {
            ids: [ID_B.to_string()].into_iter().collect(),
        };
        let result = run_bulk_scrape(
            &source,
            &dup,
            &RecordingWriter::default(),
            &StubView::default(),
            None,
            &fast_opts(),
        )
        .await
        .unwrap();

        assert_eq!(result.success_count + result.error_count, result.results.len());
        assert_eq!(result.success_count, 1);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.duplicate_count, 1);
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_save_failure_recorded_not_fatal() {
        let source = two_repo_source();
        let writer = RecordingWriter {
            fail: true,
            ..Default::default()
        };
        let result = run_bulk_scrape(
            &source,
            &StubDup { ids: HashSet::new() },
            &writer,
            &StubView::default(),
            None,
            &fast_opts(),
        )
        .await
        .unwrap();

        assert_eq!(result.success_count, 0);
        assert_eq!(result.error_count, 2);
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_new_entry_triggers_summary() {
        let source = two_repo_source();
        let writer = RecordingWriter::default();
        let service = StubSummaries::default();
        let summary_writer = RecordingSummaryWriter::default();

        let result = run_bulk_scrape(
            &source,
            &StubDup { ids: HashSet::new() },
            &writer,
            &StubView::default(),
            Some(SummaryHooks {
                service: &service,
                writer: &summary_writer,
            }),
            &fast_opts(),
        )
        .await
        .unwrap();

        assert_eq!(result.success_count, 1);
        // Save callback was told a summary follows
        assert_eq!(writer.saved.lock().unwrap().as_slice(), &[(ID_A.to_string(), true)]);
        assert_eq!(service.calls.lock().unwrap().len(), 1);
        assert_eq!(summary_writer.saved.lock().unwrap().as_slice(), &["cat-1".to_string()]);
    }

    #[tokio::test]
    async fn test_gate_skips_summary_for_current_entry() {
        let source = two_repo_source();
        let writer = RecordingWriter::default();
        let service = StubSummaries::default();
        let summary_writer = RecordingSummaryWriter::default();
        let view = StubView {
            status: CommitStatus::existing("cat-9".into(), ts(2025), ts(2025)),
            has_summary: true,
        };

        run_bulk_scrape(
            &source,
            &StubDup { ids: HashSet::new() },
            &writer,
            &view,
            Some(SummaryHooks {
                service: &service,
                writer: &summary_writer,
            }),
            &fast_opts(),
        )
        .await
        .unwrap();

        assert_eq!(writer.saved.lock().unwrap().as_slice(), &[(ID_A.to_string(), false)]);
        assert!(service.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_summary_failure_does_not_fail_ingestion() {
        let source = two_repo_source();
        let service = StubSummaries {
            fail: true,
            ..Default::default()
        };
        let summary_writer = RecordingSummaryWriter::default();

        let result = run_bulk_scrape(
            &source,
            &StubDup { ids: HashSet::new() },
            &RecordingWriter::default(),
            &StubView::default(),
            Some(SummaryHooks {
                service: &service,
                writer: &summary_writer,
            }),
            &fast_opts(),
        )
        .await
        .unwrap();

        assert_eq!(result.success_count, 1);
        assert!(result.success);
        assert!(summary_writer.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_page_aborts_later_pages() {
        let mut source = StubSource::default();
        source.pages.insert(1, vec![repo("alice/sheet-utils")]);
        source.outcomes.insert(
            "https://github.com/alice/sheet-utils".to_string(),
            Ok(library("alice/sheet-utils", ID_A, ts(2025))),
        );
        source.fail_pages.insert(2);
        source.pages.insert(3, vec![repo("carol/dup-lib")]);

        let opts = BulkOptions {
            end_page: 3,
            ..fast_opts()
        };
        let result = run_bulk_scrape(
            &source,
            &StubDup { ids: HashSet::new() },
            &RecordingWriter::default(),
            &StubView::default(),
            None,
            &opts,
        )
        .await
        .unwrap();

        // Page 1 ingested, page 2 failed, page 3 never requested
        assert_eq!(result.success_count, 1);
        assert_eq!(*source.requested_pages.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_result_order_follows_pages_and_repos() {
        let mut source = StubSource::default();
        source.pages.insert(1, vec![repo("alice/sheet-utils")]);
        source.pages.insert(2, vec![repo("carol/dup-lib")]);
        source.outcomes.insert(
            "https://github.com/alice/sheet-utils".to_string(),
            Ok(library("alice/sheet-utils", ID_A, ts(2025))),
        );
        source.outcomes.insert(
            "https://github.com/carol/dup-lib".to_string(),
            Ok(library("carol/dup-lib", ID_B, ts(2025))),
        );

        let opts = BulkOptions {
            end_page: 2,
            ..fast_opts()
        };
        let result = run_bulk_scrape(
            &source,
            &StubDup { ids: HashSet::new() },
            &RecordingWriter::default(),
            &StubView::default(),
            None,
            &opts,
        )
        .await
        .unwrap();

        let ids: Vec<&str> = result
            .results
            .iter()
            .map(|r| r.as_ref().unwrap().script_id.as_str())
            .collect();
        assert_eq!(ids, vec![ID_A, ID_B]);
    }

    #[tokio::test]
    async fn test_config_errors_fail_before_any_work() {
        let source = StubSource::default();
        for opts in [
            BulkOptions { start_page: 0, ..fast_opts() },
            BulkOptions { start_page: 5, end_page: 2, ..fast_opts() },
            BulkOptions { per_page: 0, ..fast_opts() },
            BulkOptions { per_page: 250, ..fast_opts() },
        ] {
            let err = run_bulk_scrape(
                &source,
                &StubDup { ids: HashSet::new() },
                &RecordingWriter::default(),
                &StubView::default(),
                None,
                &opts,
            )
            .await;
            assert!(err.is_err());
        }
        assert!(source.requested_pages.lock().unwrap().is_empty());
    }
}
