//! OpenAI-backed summary generation
//!
//! The pipeline treats summarization as an opaque, metered text-generation
//! service. This client is the production implementation; anything speaking
//! `SummaryService` can stand in for it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::catalog::{SummaryRecord, SummaryService};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const MAX_RETRIES: u32 = 5;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// OpenAI chat-completions client used for library summaries
pub struct OpenAiSummarizer {
    api_key: String,
    client: reqwest::Client,
    model: String,
    debug: bool,
}

impl OpenAiSummarizer {
    pub fn new(api_key: String, debug: bool) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            model: DEFAULT_MODEL.to_string(),
            debug,
        }
    }

    fn build_request(&self, source_url: &str) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You write concise catalog descriptions of Google Apps Script \
                              libraries and web apps. Two or three sentences: what the script \
                              does and who would use it. No marketing language."
                        .to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("Describe the Apps Script project hosted at {}", source_url),
                },
            ],
            max_tokens: 300,
        }
    }

    /// Send one chat request, retrying transient errors (429/502/503/504)
    /// with exponential backoff
    async fn complete(&self, source_url: &str) -> Result<String> {
        let request = self.build_request(source_url);
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay_ms = 1000 * (1 << attempt.min(4));
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }

            let start = std::time::Instant::now();
            let response = match self
                .client
                .post(OPENAI_CHAT_URL)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(format!("Request failed: {}", e));
                    continue;
                }
            };

            let elapsed = start.elapsed();
            let status = response.status();

            if status.is_success() {
                let result: ChatResponse = response
                    .json()
                    .await
                    .context("Failed to parse OpenAI response")?;

                if self.debug {
                    let now = chrono::Local::now().format("%H:%M:%S%.3f");
                    eprintln!(
                        "\x1b[90m[{}] POST {} ... {}ms\x1b[0m",
                        now,
                        OPENAI_CHAT_URL,
                        elapsed.as_millis()
                    );
                }

                return result
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .context("OpenAI returned an empty completion");
            }

            let is_transient = status == reqwest::StatusCode::BAD_GATEWAY
                || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
                || status == reqwest::StatusCode::GATEWAY_TIMEOUT
                || status == reqwest::StatusCode::TOO_MANY_REQUESTS;

            if !is_transient {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("OpenAI API error ({}): {}", status, body);
            }

            last_error = Some(format!("OpenAI API error ({})", status));
        }

        anyhow::bail!(
            "OpenAI API failed after {} retries: {}",
            MAX_RETRIES,
            last_error.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}

#[async_trait]
impl SummaryService for OpenAiSummarizer {
    async fn summarize(&self, source_url: &str) -> Result<SummaryRecord> {
        let body = self.complete(source_url).await?;
        Ok(SummaryRecord {
            source_url: source_url.to_string(),
            body,
            model: self.model.clone(),
            generated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_mentions_source_url() {
        let s = OpenAiSummarizer::new("sk-test".to_string(), false);
        let req = s.build_request("https://github.com/alice/sheet-utils");
        assert_eq!(req.model, DEFAULT_MODEL);
        assert!(req.messages[1].content.contains("github.com/alice/sheet-utils"));
    }
}
