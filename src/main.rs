mod bulk;
mod catalog;
mod config;
mod db;
mod fmt;
mod gate;
mod github;
mod ident;
mod refresh;
mod scrape;
mod summarize;

use anyhow::Result;
use clap::{Parser, Subcommand};

use bulk::{run_bulk_scrape, BulkOptions, SummaryHooks};
use config::{Config, SearchConfig};
use db::Database;
use fmt::{format_repo_link, format_stars, truncate_str};
use github::{GitHubClient, SortOption, TagSearchResult, PAGE_DELAY_MS};
use refresh::{refresh_catalog, RefreshOptions};
use scrape::GitHubSource;
use summarize::OpenAiSummarizer;

/// How many error messages to echo after a bulk run
const MAX_ERRORS_SHOWN: usize = 5;

#[derive(Parser)]
#[command(name = "scriptdex")]
#[command(about = "Catalog Google Apps Script libraries discovered on GitHub")]
#[command(after_help = "\x1b[36mExamples:\x1b[0m
  scriptdex search google-apps-script --limit 20
  scriptdex scrape google-apps-script gas-library --start-page 1 --end-page 3
  scriptdex refresh --limit 100")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape a page range of tag-search results into the catalog
    Scrape {
        /// Topic tags to search (up to 5 are combined)
        #[arg(required = true)]
        tags: Vec<String>,

        #[arg(long, default_value = "1")]
        start_page: u32,

        #[arg(long, default_value = "1")]
        end_page: u32,

        #[arg(long, default_value = "30")]
        per_page: u32,

        /// Sort order: best-match, stars or updated
        #[arg(long, default_value = "best-match")]
        sort: SortOption,

        /// Skip repositories whose last commit is older than this many years
        #[arg(long, default_value = "5")]
        max_age_years: i64,

        /// Delay between repositories in milliseconds
        #[arg(long, default_value = "1000")]
        delay_ms: u64,

        /// Disable AI summary generation
        #[arg(long)]
        no_summaries: bool,

        #[arg(long)]
        debug: bool,
    },

    /// Preview tag-search results without ingesting anything
    Search {
        /// Topic tags to search (up to 5 are combined)
        #[arg(required = true)]
        tags: Vec<String>,

        /// Number of repositories to list
        #[arg(short, long, default_value = "30")]
        limit: usize,

        /// Scan an explicit page range instead of a result count
        #[arg(long)]
        start_page: Option<u32>,

        #[arg(long)]
        end_page: Option<u32>,

        #[arg(long, default_value = "30")]
        per_page: u32,

        /// Sort order: best-match, stars or updated
        #[arg(long, default_value = "best-match")]
        sort: SortOption,

        #[arg(long)]
        debug: bool,
    },

    /// Re-check stored entries for new commits
    Refresh {
        #[arg(long, default_value = "25")]
        batch_size: usize,

        #[arg(long, default_value = "4")]
        concurrency: usize,

        /// Maximum entries to check (default: all)
        #[arg(short, long)]
        limit: Option<usize>,

        #[arg(long)]
        debug: bool,
    },

    /// Show catalog statistics
    Stats,

    /// Check GitHub API rate limit
    RateLimit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape {
            tags,
            start_page,
            end_page,
            per_page,
            sort,
            max_age_years,
            delay_ms,
            no_summaries,
            debug,
        } => {
            run_scrape(
                tags,
                start_page,
                end_page,
                per_page,
                sort,
                max_age_years,
                delay_ms,
                no_summaries,
                debug,
            )
            .await
        }
        Commands::Search {
            tags,
            limit,
            start_page,
            end_page,
            per_page,
            sort,
            debug,
        } => run_search(tags, limit, start_page, end_page, per_page, sort, debug).await,
        Commands::Refresh {
            batch_size,
            concurrency,
            limit,
            debug,
        } => run_refresh(batch_size, concurrency, limit, debug).await,
        Commands::Stats => show_stats(),
        Commands::RateLimit => check_rate_limit().await,
    }
}

fn make_client(debug: bool) -> GitHubClient {
    let token = Config::github_token();
    if token.is_none() {
        eprintln!("\x1b[33m..\x1b[0m No GitHub token found. Rate limit: 60 req/hour");
        eprintln!("  Set GITHUB_TOKEN or run: gh auth login");
    }
    GitHubClient::new_with_options(token, debug)
}

#[allow(clippy::too_many_arguments)]
async fn run_scrape(
    tags: Vec<String>,
    start_page: u32,
    end_page: u32,
    per_page: u32,
    sort: SortOption,
    max_age_years: i64,
    delay_ms: u64,
    no_summaries: bool,
    debug: bool,
) -> Result<()> {
    let mut config = SearchConfig::new(&tags)?;
    config.debug = debug;
    // Never space requests tighter than the hourly budget allows
    let delay_ms = delay_ms.max(config.min_request_spacing_ms());
    config.request_delay_ms = delay_ms;

    let db = Database::open()?;
    let client = make_client(debug);
    let source = GitHubSource {
        client: &client,
        config: &config,
    };

    let summarizer = if no_summaries {
        None
    } else {
        let key = Config::openai_key();
        if key.is_none() {
            eprintln!("\x1b[33m..\x1b[0m OPENAI_API_KEY not set, summaries disabled for this run");
        }
        key.map(|k| OpenAiSummarizer::new(k, debug))
    };

    let opts = BulkOptions {
        start_page,
        end_page,
        per_page,
        sort,
        max_age_years,
        generate_summaries: summarizer.is_some(),
        request_delay_ms: delay_ms,
        page_delay_ms: PAGE_DELAY_MS,
        debug,
    };

    let hooks = summarizer.as_ref().map(|s| SummaryHooks {
        service: s,
        writer: &db,
    });

    let result = run_bulk_scrape(&source, &db, &db, &db, hooks, &opts).await?;

    if result.success {
        println!(
            "\x1b[32mok\x1b[0m {} ingested, {} failed, {} duplicates ({} candidates)",
            result.success_count, result.error_count, result.duplicate_count, result.total
        );
    } else {
        println!(
            "\x1b[31mx\x1b[0m nothing ingested: {} failed, {} duplicates ({} candidates)",
            result.error_count, result.duplicate_count, result.total
        );
    }

    let errors: Vec<String> = result
        .results
        .iter()
        .filter_map(|r| r.as_ref().err().map(|e| e.to_string()))
        .collect();
    for message in errors.iter().take(MAX_ERRORS_SHOWN) {
        eprintln!("  \x1b[90m{}\x1b[0m", message);
    }
    if errors.len() > MAX_ERRORS_SHOWN {
        eprintln!("  \x1b[90m... and {} more\x1b[0m", errors.len() - MAX_ERRORS_SHOWN);
    }

    Ok(())
}

async fn run_search(
    tags: Vec<String>,
    limit: usize,
    start_page: Option<u32>,
    end_page: Option<u32>,
    per_page: u32,
    sort: SortOption,
    debug: bool,
) -> Result<()> {
    let mut config = SearchConfig::new(&tags)?;
    config.debug = debug;

    let client = make_client(debug);

    let result: TagSearchResult = match (start_page, end_page) {
        (Some(start), end) => {
            client
                .search_page_range(&config, start, end.unwrap_or(start), per_page, sort)
                .await
        }
        (None, Some(end)) => client.search_page_range(&config, 1, end, per_page, sort).await,
        (None, None) => client.search_by_tags(&config, limit).await,
    };

    if !result.success {
        eprintln!(
            "\x1b[31mx\x1b[0m search failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }

    println!(
        "\x1b[36m..\x1b[0m {} matched upstream, showing {}",
        result.total_count, result.retrieved
    );
    for (i, repo) in result.repositories.iter().enumerate() {
        let desc = repo.description.as_deref().unwrap_or("No description");
        println!(
            "\x1b[35m{:>3}.\x1b[0m {} \x1b[33m{}\x1b[0m \x1b[90m{}\x1b[0m",
            i + 1,
            format_repo_link(&repo.full_name, &repo.html_url),
            format_stars(repo.stargazers_count),
            truncate_str(desc, 60)
        );
    }

    Ok(())
}

async fn run_refresh(
    batch_size: usize,
    concurrency: usize,
    limit: Option<usize>,
    debug: bool,
) -> Result<()> {
    let db = Database::open()?;
    let client = make_client(debug);
    let opts = RefreshOptions {
        batch_size,
        concurrency,
        limit,
        debug,
        ..Default::default()
    };

    let result = refresh_catalog(&client, &db, &opts).await?;
    println!(
        "\x1b[32mok\x1b[0m checked {} entries: {} updated, {} failed ({} batches)",
        result.checked, result.updated, result.failed, result.batches
    );
    Ok(())
}

fn show_stats() -> Result<()> {
    let db = Database::open()?;
    let stats = db.stats()?;
    println!("Catalog entries: {}", stats.total);
    println!("  libraries:     {}", stats.libraries);
    println!("  web apps:      {}", stats.web_apps);
    println!("  summaries:     {}", stats.summaries);
    Ok(())
}

async fn check_rate_limit() -> Result<()> {
    let client = make_client(false);
    let rates = client.rate_limit().await?;
    println!(
        "core:   {}/{} (resets at epoch {})",
        rates.core.remaining, rates.core.limit, rates.core.reset
    );
    println!(
        "search: {}/{} (resets at epoch {})",
        rates.search.remaining, rates.search.limit, rates.search.reset
    );
    Ok(())
}
