//! Perplexity chat-completions adapter.
//!
//! Implements `LlmPort`. Each `TaskKind` maps to a model profile (model,
//! token budget, temperature, web search). Retries follow `RetryPolicy`.

use crate::domain::DomainError;
use crate::ports::{ChatMessage, CompletionRequest, LlmPort, LlmReply, TaskKind, Usage};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_API_URL: &str = "https://api.perplexity.ai/chat/completions";

/// Taiwanese financial news sites used to scope web search.
pub const TRUSTED_DOMAINS: &[&str] = &[
    "cnyes.com",
    "money.udn.com",
    "ctee.com.tw",
    "wealth.com.tw",
    "businessweekly.com.tw",
    "cw.com.tw",
    "mops.twse.com.tw",
    "twse.com.tw",
];

/// Model and sampling settings for one kind of task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelProfile {
    pub model: &'static str,
    pub max_tokens: u32,
    pub temperature: f32,
    pub description: &'static str,
    pub use_search: bool,
}

pub fn profile(task: TaskKind) -> ModelProfile {
    match task {
        TaskKind::NewsSearch => ModelProfile {
            model: "sonar",
            max_tokens: 800,
            temperature: 0.2,
            description: "news search",
            use_search: true,
        },
        TaskKind::NewsSummary => ModelProfile {
            model: "sonar",
            max_tokens: 500,
            temperature: 0.1,
            description: "news summary",
            use_search: false,
        },
        TaskKind::Technical => ModelProfile {
            model: "sonar-reasoning",
            max_tokens: 2500,
            temperature: 0.3,
            description: "technical analysis",
            use_search: false,
        },
        TaskKind::Comprehensive => ModelProfile {
            model: "sonar-pro",
            max_tokens: 3500,
            temperature: 0.3,
            description: "comprehensive analysis",
            use_search: false,
        },
        TaskKind::DeepResearch => ModelProfile {
            model: "sonar-research",
            max_tokens: 4000,
            temperature: 0.2,
            description: "deep research",
            use_search: true,
        },
        TaskKind::Quick => ModelProfile {
            model: "sonar",
            max_tokens: 4000,
            temperature: 0.3,
            description: "quick analysis",
            use_search: false,
        },
    }
}

/// Attempts and back-off delays between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Multiplied by the attempt number after a 429.
    pub rate_limit_backoff: Duration,
    pub timeout_backoff: Duration,
    pub error_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            rate_limit_backoff: Duration::from_secs(10),
            timeout_backoff: Duration::from_secs(5),
            error_backoff: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            rate_limit_backoff: Duration::ZERO,
            timeout_backoff: Duration::ZERO,
            error_backoff: Duration::ZERO,
        }
    }
}

pub struct PerplexityAdapter {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl PerplexityAdapter {
    /// # Arguments
    /// * `api_url` - chat completions endpoint (see [`DEFAULT_API_URL`])
    /// * `api_key` - Perplexity API key (`pplx-...`)
    /// * `timeout` - per-request timeout
    pub fn new(
        api_url: String,
        api_key: String,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::Llm(format!("HTTP client init failed: {}", e)))?;
        Ok(Self {
            client,
            api_url,
            api_key,
            retry,
        })
    }

    /// Reasoning models prefix the answer with a `<think>...</think>` block.
    fn strip_reasoning(raw: &str) -> String {
        let trimmed = raw.trim();
        if let Some(end) = trimmed.find("</think>") {
            if trimmed.starts_with("<think>") {
                return trimmed[end + "</think>".len()..].trim().to_string();
            }
        }
        trimmed.to_string()
    }

    fn build_request(request: &CompletionRequest) -> ChatRequest<'_> {
        let profile = profile(request.task);
        ChatRequest {
            model: profile.model,
            messages: &request.messages,
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
            search_domain_filter: (profile.use_search && !request.search_domains.is_empty())
                .then_some(request.search_domains.as_slice()),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'static str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_domain_filter: Option<&'a [String]>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

#[async_trait::async_trait]
impl LlmPort for PerplexityAdapter {
    async fn complete(&self, request: CompletionRequest) -> Result<LlmReply, DomainError> {
        let body = Self::build_request(&request);
        let profile = profile(request.task);
        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = DomainError::Llm("no attempt made".to_string());

        for attempt in 1..=attempts {
            let is_last = attempt == attempts;
            info!(
                model = profile.model,
                task = profile.description,
                attempt,
                attempts,
                "sending request to Perplexity"
            );

            let response = match self
                .client
                .post(&self.api_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    warn!(attempt, "Perplexity request timed out");
                    last_error = DomainError::Llm(format!("request timed out: {}", e));
                    if !is_last {
                        tokio::time::sleep(self.retry.timeout_backoff).await;
                    }
                    continue;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Perplexity request failed");
                    last_error = DomainError::Llm(format!("HTTP request failed: {}", e));
                    if !is_last {
                        tokio::time::sleep(self.retry.error_backoff).await;
                    }
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                warn!("Perplexity rejected the API key");
                return Err(DomainError::LlmAuth);
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                warn!(attempt, "Perplexity rate limit hit");
                last_error = DomainError::RateLimited;
                if !is_last {
                    tokio::time::sleep(self.retry.rate_limit_backoff * attempt).await;
                }
                continue;
            }
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                warn!(status = %status, body = %text, "Perplexity returned error");
                last_error = DomainError::Llm(format!(
                    "API error {}: {}",
                    status,
                    text.chars().take(200).collect::<String>()
                ));
                if !is_last {
                    tokio::time::sleep(self.retry.error_backoff).await;
                }
                continue;
            }

            let chat: ChatResponse = response
                .json()
                .await
                .map_err(|e| DomainError::Llm(format!("Failed to parse API response: {}", e)))?;
            let raw = chat
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| DomainError::Llm("No response choices returned".to_string()))?;
            debug!(raw_len = raw.len(), "received Perplexity response");

            info!(
                model = profile.model,
                prompt_tokens = chat.usage.prompt_tokens,
                completion_tokens = chat.usage.completion_tokens,
                total_tokens = chat.usage.total_tokens,
                "Perplexity call complete"
            );
            return Ok(LlmReply {
                content: Self::strip_reasoning(&raw),
                usage: chat.usage,
                model: profile.model.to_string(),
            });
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn adapter(server: &MockServer, attempts: u32) -> PerplexityAdapter {
        PerplexityAdapter::new(
            server.url("/chat/completions"),
            "pplx-test".to_string(),
            Duration::from_secs(5),
            RetryPolicy::immediate(attempts),
        )
        .unwrap()
    }

    fn ok_body(content: &str) -> serde_json::Value {
        json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 30, "total_tokens": 42}
        })
    }

    #[test]
    fn test_strip_reasoning_block() {
        let raw = "<think>\nweighing RSI\n</think>\n\n## 結論";
        assert_eq!(PerplexityAdapter::strip_reasoning(raw), "## 結論");
    }

    #[test]
    fn test_strip_reasoning_plain_text() {
        assert_eq!(PerplexityAdapter::strip_reasoning("  hello "), "hello");
    }

    #[test]
    fn test_domain_filter_only_for_search_profiles() {
        let search = CompletionRequest::new(TaskKind::NewsSearch, "s", "u")
            .with_search_domains(TRUSTED_DOMAINS);
        let body = serde_json::to_value(PerplexityAdapter::build_request(&search)).unwrap();
        assert_eq!(body["model"], "sonar");
        assert_eq!(body["max_tokens"], 800);
        assert_eq!(body["search_domain_filter"][0], "cnyes.com");

        let summary = CompletionRequest::new(TaskKind::NewsSummary, "s", "u")
            .with_search_domains(TRUSTED_DOMAINS);
        let body = serde_json::to_value(PerplexityAdapter::build_request(&summary)).unwrap();
        assert!(body.get("search_domain_filter").is_none());
    }

    #[tokio::test]
    async fn test_complete_returns_content_and_usage() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("Authorization", "Bearer pplx-test")
                    .body_contains("sonar-pro");
                then.status(200).json_body(ok_body("建議觀望"));
            })
            .await;

        let reply = adapter(&server, 2)
            .complete(CompletionRequest::new(TaskKind::Comprehensive, "sys", "user"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(reply.content, "建議觀望");
        assert_eq!(reply.model, "sonar-pro");
        assert_eq!(reply.usage.total_tokens, 42);
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(401);
            })
            .await;

        let err = adapter(&server, 3)
            .complete(CompletionRequest::new(TaskKind::Quick, "s", "u"))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::LlmAuth));
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_rate_limit_retries_then_fails() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(429);
            })
            .await;

        let err = adapter(&server, 2)
            .complete(CompletionRequest::new(TaskKind::Quick, "s", "u"))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::RateLimited));
        mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_server_error_carries_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(500).body("upstream exploded");
            })
            .await;

        let err = adapter(&server, 1)
            .complete(CompletionRequest::new(TaskKind::Technical, "s", "u"))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Llm(ref m) if m.contains("upstream exploded")));
    }
}
