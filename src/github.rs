//! GitHub REST client for repository discovery and scraping
//!
//! All requests go through a retry loop with exponential backoff; rate-limit
//! responses wait for the reset advertised in `x-ratelimit-reset` (capped).
//! Search failures never escape as panics - they surface on `TagSearchResult`.

use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::config::SearchConfig;

/// Topic queries OR at most this many tags; extra tags are dropped silently
const MAX_QUERY_TAGS: usize = 5;

/// Fixed delay between successive search pages
pub const PAGE_DELAY_MS: u64 = 2000;

/// Sort order for repository search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOption {
    BestMatch,
    Stars,
    Updated,
}

impl SortOption {
    fn as_query_param(&self) -> Option<&'static str> {
        match self {
            SortOption::BestMatch => None,
            SortOption::Stars => Some("stars"),
            SortOption::Updated => Some("updated"),
        }
    }
}

impl std::str::FromStr for SortOption {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "best-match" => Ok(SortOption::BestMatch),
            "stars" => Ok(SortOption::Stars),
            "updated" => Ok(SortOption::Updated),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

/// Repository owner as returned by the search API
#[derive(Debug, Clone, Deserialize)]
pub struct RepoOwner {
    pub login: String,
    pub html_url: String,
}

/// License info as returned by the search API
#[derive(Debug, Clone, Deserialize)]
pub struct RepoLicense {
    pub name: String,
    pub url: Option<String>,
}

/// One discovered candidate repository (read-only downstream)
#[derive(Debug, Clone, Deserialize)]
pub struct RepoSummary {
    pub full_name: String,
    pub name: String,
    pub html_url: String,
    pub description: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    pub owner: RepoOwner,
    pub license: Option<RepoLicense>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    total_count: u64,
    items: Vec<RepoSummary>,
}

/// Outcome of a search call. Failures are values, not panics.
#[derive(Debug, Default)]
pub struct TagSearchResult {
    pub success: bool,
    pub repositories: Vec<RepoSummary>,
    /// Total matches reported upstream, captured from the first page only
    pub total_count: u64,
    pub retrieved: usize,
    pub error: Option<String>,
}

impl TagSearchResult {
    fn failure(error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Default::default()
        }
    }
}

/// README content response
#[derive(Debug, Deserialize)]
struct ReadmeResponse {
    content: String,
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct CommitEntry {
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    committer: Option<CommitSignature>,
    author: Option<CommitSignature>,
}

#[derive(Debug, Deserialize)]
struct CommitSignature {
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RateLimit {
    pub limit: u32,
    pub remaining: u32,
    pub reset: u64,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitResources {
    pub core: RateLimit,
    pub search: RateLimit,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

/// GitHub API client
#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    token: Option<String>,
    debug: bool,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Self {
        Self::new_with_options(token, false)
    }

    pub fn new_with_options(token: Option<String>, debug: bool) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("scriptdex/0.1.0")
            .build()
            .expect("Failed to create HTTP client");

        Self { client, token, debug }
    }

    /// Build request with auth header if token available
    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req.header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Send request with optional debug timing
    async fn send_request(&self, url: &str) -> Result<reqwest::Response, reqwest::Error> {
        let start = std::time::Instant::now();
        let result = self.request(url).send().await;
        if self.debug {
            let now = chrono::Local::now().format("%H:%M:%S%.3f");
            eprintln!("\x1b[90m[{}] GET {} ... {}ms\x1b[0m", now, url, start.elapsed().as_millis());
        }
        result
    }

    /// GET with retry on transient errors and rate-limit waits.
    /// Success, 404 and 422 return the response; the caller decides what
    /// those statuses mean for its endpoint.
    async fn rest_get(&self, url: &str) -> Result<reqwest::Response> {
        for attempt in 0..5 {
            if attempt > 0 {
                let delay = Duration::from_millis(500 * (1 << attempt.min(3)));
                tokio::time::sleep(delay).await;
            }

            let response = match self.send_request(url).await {
                Ok(r) => r,
                Err(e) => {
                    if attempt == 4 {
                        anyhow::bail!("Request failed: {}", e);
                    }
                    continue;
                }
            };

            let status = response.status();

            if status.is_success()
                || status == reqwest::StatusCode::NOT_FOUND
                || status == reqwest::StatusCode::UNPROCESSABLE_ENTITY
            {
                return Ok(response);
            }

            // Transient upstream errors
            if status == reqwest::StatusCode::BAD_GATEWAY
                || status == reqwest::StatusCode::GATEWAY_TIMEOUT
                || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
            {
                continue;
            }

            // Rate limited: wait for the advertised reset (capped at 2 min)
            if status == reqwest::StatusCode::FORBIDDEN
                || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                let reset = response
                    .headers()
                    .get("x-ratelimit-reset")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(now + 60);

                let wait_secs = if reset > now { (reset - now).min(120) } else { 2 };
                if self.debug {
                    eprintln!("\x1b[33m[github]\x1b[0m rate limited, waiting {}s", wait_secs);
                }
                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                continue;
            }

            if attempt == 4 {
                anyhow::bail!("GitHub API error {}", status);
            }
        }

        anyhow::bail!("Request failed after 5 retries");
    }

    /// Get repository metadata
    pub async fn get_repo(&self, owner: &str, repo: &str) -> Result<RepoSummary> {
        let url = format!("https://api.github.com/repos/{}/{}", owner, repo);

        let response = self.rest_get(&url).await?;
        if !response.status().is_success() {
            anyhow::bail!("GitHub API error {}: {}/{}", response.status(), owner, repo);
        }

        response
            .json::<RepoSummary>()
            .await
            .context("Failed to parse repo details")
    }

    /// Get README content, decoded. Missing READMEs and undecodable payloads
    /// are `Ok(None)`, never errors.
    pub async fn get_readme(&self, owner: &str, repo: &str) -> Result<Option<String>> {
        let url = format!("https://api.github.com/repos/{}/{}/readme", owner, repo);

        let response = self.rest_get(&url).await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        let readme: ReadmeResponse = match response.json().await {
            Ok(r) => r,
            Err(_) => return Ok(None),
        };

        if readme.encoding != "base64" {
            return Ok(None);
        }

        // GitHub sends base64 with embedded newlines
        let cleaned = readme.content.replace('\n', "");
        let decoded = match base64::engine::general_purpose::STANDARD.decode(&cleaned) {
            Ok(d) => d,
            Err(_) => return Ok(None),
        };

        Ok(String::from_utf8(decoded).ok())
    }

    /// Get the date of the most recent commit on the default branch
    pub async fn get_last_commit_date(&self, owner: &str, repo: &str) -> Result<Option<DateTime<Utc>>> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/commits?per_page=1",
            owner, repo
        );

        let response = self.rest_get(&url).await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        let commits: Vec<CommitEntry> = match response.json().await {
            Ok(c) => c,
            Err(_) => return Ok(None),
        };

        let date = commits.first().and_then(|c| {
            c.commit
                .committer
                .as_ref()
                .and_then(|s| s.date.as_deref())
                .or_else(|| c.commit.author.as_ref().and_then(|s| s.date.as_deref()))
                .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                .map(|d| d.with_timezone(&Utc))
        });

        Ok(date)
    }

    /// Check search + core rate limit status
    pub async fn rate_limit(&self) -> Result<RateLimitResources> {
        let url = "https://api.github.com/rate_limit";
        let response = self
            .request(url)
            .send()
            .await
            .context("Failed to check rate limit")?;
        let data: RateLimitResponse = response.json().await?;
        Ok(data.resources)
    }

    /// OR-combine up to five non-empty tags into one topic query
    fn build_topic_query(tags: &[String]) -> String {
        let parts: Vec<String> = tags
            .iter()
            .filter(|t| !t.trim().is_empty())
            .take(MAX_QUERY_TAGS)
            .map(|t| format!("topic:{}", t.trim()))
            .collect();
        parts.join(" OR ")
    }

    async fn search_request(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
        sort: SortOption,
    ) -> Result<reqwest::Response> {
        let mut url = format!(
            "https://api.github.com/search/repositories?q={}&per_page={}&page={}",
            urlencode(query),
            per_page,
            page
        );
        if let Some(sort) = sort.as_query_param() {
            url.push_str(&format!("&sort={}", sort));
        }
        self.rest_get(&url).await
    }

    /// Search a single page of the tag query. A 422 rejection of the combined
    /// query falls back once to a minimal single-tag query before giving up.
    pub async fn search_page(
        &self,
        config: &SearchConfig,
        page: u32,
        per_page: u32,
        sort: SortOption,
    ) -> TagSearchResult {
        let query = Self::build_topic_query(config.tags());
        if query.is_empty() {
            return TagSearchResult::failure("no valid search tags".to_string());
        }

        let mut response = match self.search_request(&query, page, per_page, sort).await {
            Ok(r) => r,
            Err(e) => return TagSearchResult::failure(e.to_string()),
        };

        if response.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            // Query rejected upstream - degrade to the first tag alone
            let fallback = format!("topic:{}", config.tags()[0]);
            if config.debug {
                eprintln!(
                    "\x1b[33m[search]\x1b[0m query rejected, falling back to {}",
                    fallback
                );
            }
            response = match self.search_request(&fallback, page, per_page, sort).await {
                Ok(r) => r,
                Err(e) => return TagSearchResult::failure(e.to_string()),
            };
        }

        if !response.status().is_success() {
            return TagSearchResult::failure(format!("GitHub search error {}", response.status()));
        }

        let parsed: SearchResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                return TagSearchResult::failure(format!("Failed to parse search response: {}", e))
            }
        };

        let retrieved = parsed.items.len();
        TagSearchResult {
            success: true,
            repositories: parsed.items,
            total_count: parsed.total_count,
            retrieved,
            error: None,
        }
    }

    /// Search until `max_results` repositories are collected or results run
    /// out. The final page's surplus is truncated.
    pub async fn search_by_tags(&self, config: &SearchConfig, max_results: usize) -> TagSearchResult {
        let mut out = TagSearchResult {
            success: true,
            ..Default::default()
        };

        let per_page = 100.min(max_results.max(1)) as u32;
        let mut page = 1u32;

        while out.repositories.len() < max_results {
            let result = self.search_page(config, page, per_page, SortOption::BestMatch).await;
            if !result.success {
                // Abort the scan; keep whatever was already retrieved
                out.success = false;
                out.error = result.error;
                break;
            }

            if page == 1 {
                out.total_count = result.total_count;
            }
            if result.repositories.is_empty() {
                break;
            }

            let exhausted = result.retrieved < per_page as usize;
            out.repositories.extend(result.repositories);
            if exhausted {
                break;
            }

            page += 1;
            if config.request_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(config.request_delay_ms)).await;
            }
        }

        out.repositories.truncate(max_results);
        out.retrieved = out.repositories.len();
        out
    }

    /// Search an inclusive page range, one request per page, with a fixed
    /// inter-page delay (not applied after the final page). Stops early on an
    /// empty page: upstream orders by relevance/recency, so an empty page
    /// signals exhaustion.
    pub async fn search_page_range(
        &self,
        config: &SearchConfig,
        start_page: u32,
        end_page: u32,
        per_page: u32,
        sort: SortOption,
    ) -> TagSearchResult {
        let mut out = TagSearchResult {
            success: true,
            ..Default::default()
        };

        for page in start_page..=end_page {
            let result = self.search_page(config, page, per_page, sort).await;
            if !result.success {
                // This page's continuation is aborted; pages after it are
                // not attempted
                out.success = false;
                out.error = result.error;
                break;
            }

            if page == start_page {
                out.total_count = result.total_count;
            }
            if result.repositories.is_empty() {
                break;
            }

            out.repositories.extend(result.repositories);

            if page < end_page {
                tokio::time::sleep(Duration::from_millis(PAGE_DELAY_MS)).await;
            }
        }

        out.retrieved = out.repositories.len();
        out
    }
}

/// Percent-encode a search query (spaces and the few reserved chars GitHub
/// queries can contain)
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '&' => out.push_str("%26"),
            '+' => out.push_str("%2B"),
            _ => out.push(c),
        }
    }
    out
}
