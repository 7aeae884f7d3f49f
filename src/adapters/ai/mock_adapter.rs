//! Mock LLM adapter for offline runs and tests.
//!
//! Returns canned Traditional Chinese replies without making API calls.

use crate::domain::DomainError;
use crate::ports::{CompletionRequest, LlmPort, LlmReply, TaskKind, Usage};
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// Mock LLM adapter.
///
/// Simulates network latency with a configurable delay and records the
/// tasks it was asked to run.
pub struct MockLlmAdapter {
    /// Simulated network delay in milliseconds.
    delay_ms: u64,
    fail: bool,
    calls: Mutex<Vec<TaskKind>>,
}

impl MockLlmAdapter {
    /// Mock adapter with the default delay (100ms).
    pub fn new() -> Self {
        Self::with_delay(100)
    }

    pub fn with_delay(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with `DomainError::Llm`.
    pub fn failing() -> Self {
        Self {
            delay_ms: 0,
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Tasks requested so far, in call order.
    pub fn calls(&self) -> Vec<TaskKind> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn canned(task: TaskKind) -> (&'static str, &'static str) {
        match task {
            TaskKind::NewsSearch => (
                "sonar",
                "- [MOCK] 公司公布第三季財報，營收年增 12% (cnyes.com)\n- [MOCK] 法說會釋出展望 (money.udn.com)",
            ),
            TaskKind::NewsSummary => (
                "sonar",
                "## [MOCK] 重要新聞\n\n### 財報優於預期\n- **類型**: 財報\n- **影響**: 正面\n- **重點**: 營收年增",
            ),
            TaskKind::DeepResearch => ("sonar-research", "## [MOCK] 深度研究\n\n重大事件影響評估。"),
            TaskKind::Technical => ("sonar-reasoning", "## [MOCK] 技術面分析\n\n適合度: ⚠️謹慎"),
            TaskKind::Comprehensive => ("sonar-pro", "## [MOCK] 綜合分析\n\n適合度: ✅適合"),
            TaskKind::Quick => ("sonar", "1. 適合度: ⚠️謹慎\n2. 進場價: NT$ 100"),
        }
    }
}

impl Default for MockLlmAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmPort for MockLlmAdapter {
    async fn complete(&self, request: CompletionRequest) -> Result<LlmReply, DomainError> {
        info!(task = ?request.task, messages = request.messages.len(), "[MOCK] Simulating LLM call");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.task);
        }

        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;

        if self.fail {
            return Err(DomainError::Llm("[MOCK] simulated failure".to_string()));
        }

        let (model, content) = Self::canned(request.task);
        let prompt_tokens = request
            .messages
            .iter()
            .map(|m| m.content.chars().count() as u64)
            .sum::<u64>()
            / 2;
        let completion_tokens = content.chars().count() as u64 / 2;
        Ok(LlmReply {
            content: content.to_string(),
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            model: model.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_adapter() {
        let adapter = MockLlmAdapter::with_delay(10);
        let reply = adapter
            .complete(CompletionRequest::new(TaskKind::NewsSearch, "sys", "2330 news"))
            .await
            .unwrap();

        assert_eq!(reply.model, "sonar");
        assert!(reply.content.contains("財報"));
        assert_eq!(
            reply.usage.total_tokens,
            reply.usage.prompt_tokens + reply.usage.completion_tokens
        );
        assert_eq!(adapter.calls(), vec![TaskKind::NewsSearch]);
    }

    #[tokio::test]
    async fn test_failing_mock() {
        let adapter = MockLlmAdapter::failing();
        let err = adapter
            .complete(CompletionRequest::new(TaskKind::Quick, "s", "u"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Llm(_)));
    }
}
