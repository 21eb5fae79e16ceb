use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use regex::Regex;
use std::path::PathBuf;

use crate::ident;

pub struct Config;

impl Config {
    /// Get the data directory path
    fn data_dir() -> Result<PathBuf> {
        ProjectDirs::from("dev", "scriptdex", "scriptdex")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .context("Could not determine data directory")
    }

    /// Get the catalog database file path
    pub fn db_path() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("catalog.db"))
    }

    /// Get GitHub token from environment or gh CLI config
    pub fn github_token() -> Option<String> {
        // First try environment variable
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            if !token.is_empty() {
                return Some(token);
            }
        }

        // Try GH_TOKEN (used by gh CLI)
        if let Ok(token) = std::env::var("GH_TOKEN") {
            if !token.is_empty() {
                return Some(token);
            }
        }

        // Try to get from gh CLI config
        if let Ok(output) = std::process::Command::new("gh")
            .args(["auth", "token"])
            .output()
        {
            if output.status.success() {
                let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !token.is_empty() {
                    return Some(token);
                }
            }
        }

        None
    }

    /// Get OpenAI API key from environment (summaries are skipped without it)
    pub fn openai_key() -> Option<String> {
        std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())
    }
}

/// Immutable per-run search configuration: topic tags, rate-limit budget and
/// the pattern sets used for identifier extraction and web-app detection.
#[derive(Clone)]
pub struct SearchConfig {
    tags: Vec<String>,
    pub max_requests_per_hour: u32,
    pub request_delay_ms: u64,
    pub debug: bool,
    /// Identifier patterns in priority order (most specific first)
    pub id_patterns: Vec<Regex>,
    /// Companion source-file patterns used as web-app evidence
    pub source_file_patterns: Vec<Regex>,
}

impl SearchConfig {
    /// Build a config from raw tag input. Tags are trimmed, empty entries
    /// dropped and duplicates removed while preserving first-seen order.
    /// Fails fast when no usable tag remains.
    pub fn new(raw_tags: &[String]) -> Result<Self> {
        let mut tags: Vec<String> = Vec::new();
        for tag in raw_tags {
            let tag = tag.trim();
            if tag.is_empty() {
                continue;
            }
            if !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
        if tags.is_empty() {
            bail!("no valid search tags given");
        }

        Ok(Self {
            tags,
            max_requests_per_hour: 3600,
            request_delay_ms: 1000,
            debug: false,
            id_patterns: ident::default_id_patterns().to_vec(),
            source_file_patterns: ident::default_source_file_patterns().to_vec(),
        })
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Smallest request spacing that stays inside the hourly budget.
    /// Callers clamp their configured delay to at least this.
    pub fn min_request_spacing_ms(&self) -> u64 {
        3_600_000 / self.max_requests_per_hour.max(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_deduped_in_order() {
        let cfg = SearchConfig::new(&[
            "google-apps-script".into(),
            "gas-library".into(),
            "google-apps-script".into(),
            "  ".into(),
            "apps-script".into(),
        ])
        .unwrap();
        assert_eq!(
            cfg.tags(),
            &["google-apps-script", "gas-library", "apps-script"]
        );
    }

    #[test]
    fn test_no_valid_tags_is_an_error() {
        assert!(SearchConfig::new(&[]).is_err());
        assert!(SearchConfig::new(&["".into(), "   ".into()]).is_err());
    }

    #[test]
    fn test_request_spacing_follows_hourly_budget() {
        let mut cfg = SearchConfig::new(&["gas".into()]).unwrap();
        assert_eq!(cfg.min_request_spacing_ms(), 1000);
        cfg.max_requests_per_hour = 720;
        assert_eq!(cfg.min_request_spacing_ms(), 5000);
    }
}
