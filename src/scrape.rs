//! Per-repository scraping: metadata + README + last commit, then
//! classification into one normalized ingestion record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::SearchConfig;
use crate::github::{GitHubClient, SortOption, TagSearchResult};
use crate::ident::{self, ScriptType};

/// Why a repository could not be turned into a catalog record
#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    #[error("not a github.com repository URL: {0}")]
    ForeignHost(String),

    #[error("repository URL is missing owner/name segments: {0}")]
    MalformedUrl(String),

    #[error("{name}: API failure: {message}")]
    Api { name: String, message: String },

    #[error("{0}: no script identifier could be classified from the README")]
    NoIdentifier(String),

    #[error("{0}: could not determine the last commit date")]
    MissingCommitDate(String),

    #[error("{name}: save failed: {message}")]
    SaveFailed { name: String, message: String },
}

/// Tagged per-repository outcome; there is no partial state
pub type ScrapeResult = Result<ScrapedLibrary, ScrapeError>;

/// Catalog lifecycle state of a freshly scraped record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryStatus {
    Pending,
}

impl LibraryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryStatus::Pending => "pending",
        }
    }
}

/// Normalized ingestion record. `script_id` is always non-empty and
/// `last_commit_at` always valid - both are preconditions for persistence.
/// Read-only after construction.
#[derive(Debug, Clone)]
pub struct ScrapedLibrary {
    pub name: String,
    pub script_id: String,
    pub script_type: ScriptType,
    pub repository_url: String,
    pub author_name: String,
    pub author_url: String,
    pub description: Option<String>,
    pub license_name: Option<String>,
    pub license_url: Option<String>,
    pub star_count: u64,
    pub last_commit_at: DateTime<Utc>,
    pub status: LibraryStatus,
    /// Raw README, retained for library-type records only
    pub readme: Option<String>,
}

/// Parse `{owner}/{repo}` out of a repository URL. Fails fast on foreign
/// hosts and paths with fewer than two segments - before any network call.
pub fn parse_repo_url(url: &str) -> Result<(String, String), ScrapeError> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);

    let mut segments = rest.split('/');
    let host = segments.next().unwrap_or("");
    if host != "github.com" && host != "www.github.com" {
        return Err(ScrapeError::ForeignHost(url.to_string()));
    }

    let owner = segments.next().unwrap_or("").trim();
    let repo = segments
        .next()
        .unwrap_or("")
        .trim()
        .trim_end_matches(".git");
    if owner.is_empty() || repo.is_empty() {
        return Err(ScrapeError::MalformedUrl(url.to_string()));
    }

    Ok((owner.to_string(), repo.to_string()))
}

/// Scrape one repository into a `ScrapedLibrary`.
///
/// Metadata, README and last-commit date are three independent calls with no
/// ordering dependency, fetched concurrently. A repository without a
/// classifiable identifier or without a commit date is a hard failure.
pub async fn scrape_repository(
    client: &GitHubClient,
    config: &SearchConfig,
    repository_url: &str,
) -> ScrapeResult {
    let (owner, repo) = parse_repo_url(repository_url)?;
    let name = format!("{}/{}", owner, repo);

    let (info, readme, last_commit) = tokio::join!(
        client.get_repo(&owner, &repo),
        client.get_readme(&owner, &repo),
        client.get_last_commit_date(&owner, &repo),
    );

    let info = info.map_err(|e| ScrapeError::Api {
        name: name.clone(),
        message: e.to_string(),
    })?;
    // A README fetch error is treated like a missing README; classification
    // below decides whether that sinks the record
    let readme = readme.unwrap_or(None);
    let last_commit = last_commit
        .map_err(|e| ScrapeError::Api {
            name: name.clone(),
            message: e.to_string(),
        })?
        .ok_or_else(|| ScrapeError::MissingCommitDate(name.clone()))?;

    let classification = readme
        .as_deref()
        .and_then(|text| {
            ident::classify_with(
                text,
                &owner,
                &repo,
                &config.id_patterns,
                &config.source_file_patterns,
            )
        })
        .ok_or_else(|| ScrapeError::NoIdentifier(name.clone()))?;

    let readme = match classification.script_type {
        ScriptType::Library => readme,
        ScriptType::WebApp => None,
    };

    Ok(ScrapedLibrary {
        name: info.name,
        script_id: classification.script_id,
        script_type: classification.script_type,
        repository_url: info.html_url,
        author_name: info.owner.login,
        author_url: info.owner.html_url,
        description: info.description,
        license_name: info.license.as_ref().map(|l| l.name.clone()),
        license_url: info.license.and_then(|l| l.url),
        star_count: info.stargazers_count,
        last_commit_at: last_commit,
        status: LibraryStatus::Pending,
        readme,
    })
}

/// Search + scrape seam the orchestrator drives. Production wires this to
/// the GitHub client; tests substitute a canned source.
#[async_trait]
pub trait ScriptSource: Send + Sync {
    async fn search_page(&self, page: u32, per_page: u32, sort: SortOption) -> TagSearchResult;
    async fn scrape(&self, repository_url: &str) -> ScrapeResult;
}

/// The production source: GitHub search plus per-repository scraping
pub struct GitHubSource<'a> {
    pub client: &'a GitHubClient,
    pub config: &'a SearchConfig,
}

#[async_trait]
impl ScriptSource for GitHubSource<'_> {
    async fn search_page(&self, page: u32, per_page: u32, sort: SortOption) -> TagSearchResult {
        self.client.search_page(self.config, page, per_page, sort).await
    }

    async fn scrape(&self, repository_url: &str) -> ScrapeResult {
        scrape_repository(self.client, self.config, repository_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repo_url() {
        assert_eq!(
            parse_repo_url("https://github.com/alice/sheet-utils").unwrap(),
            ("alice".to_string(), "sheet-utils".to_string())
        );
        assert_eq!(
            parse_repo_url("https://github.com/alice/sheet-utils/tree/main").unwrap(),
            ("alice".to_string(), "sheet-utils".to_string())
        );
        assert_eq!(
            parse_repo_url("http://www.github.com/a/b.git").unwrap(),
            ("a".to_string(), "b".to_string())
        );
    }

    #[test]
    fn test_parse_repo_url_foreign_host() {
        assert!(matches!(
            parse_repo_url("https://gitlab.com/alice/repo"),
            Err(ScrapeError::ForeignHost(_))
        ));
    }

    #[test]
    fn test_parse_repo_url_too_short() {
        assert!(matches!(
            parse_repo_url("https://github.com/alice"),
            Err(ScrapeError::MalformedUrl(_))
        ));
        assert!(matches!(
            parse_repo_url("https://github.com/"),
            Err(ScrapeError::MalformedUrl(_))
        ));
    }

    #[test]
    fn test_status_serializes_as_pending() {
        assert_eq!(LibraryStatus::Pending.as_str(), "pending");
    }
}
