//! Outbound ports. Application calls into infrastructure.
//!
//! Implemented by adapters.

use crate::domain::{
    CacheStats, CachedNews, CleanupCounts, DomainError, InstitutionalFlow, MarginBalance,
    MarketBreadth, PriceBar, ProbeReport, QueryStat, TechnicalFrame,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Market data provider (FinMind).
#[async_trait::async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Daily bars in `[start, end]`, ascending by date. Empty when the
    /// provider has nothing for the range.
    async fn fetch_prices(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, DomainError>;

    /// Institutional net buy/sell per day, newest first.
    async fn fetch_institutional(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<InstitutionalFlow>, DomainError>;

    /// Market-wide advancers/decliners for one day. `None` when unpublished.
    async fn fetch_breadth(&self, date: NaiveDate) -> Result<Option<MarketBreadth>, DomainError>;

    /// Margin purchase / short sale balances, ascending by date.
    async fn fetch_margin(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MarginBalance>, DomainError>;

    /// Connectivity check. Failures are reported, never returned as errors.
    async fn probe(&self, code: &str) -> ProbeReport;
}

/// Local cache of prices and institutional flows.
#[async_trait::async_trait]
pub trait PriceCachePort: Send + Sync {
    /// Cached bars in range, ascending. Empty on miss.
    async fn cached_prices(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, DomainError>;

    /// Insert or replace bars keyed by (code, date).
    async fn save_prices(&self, code: &str, bars: &[PriceBar]) -> Result<(), DomainError>;

    /// Cached flows in range, newest first. Empty on miss.
    async fn cached_institutional(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<InstitutionalFlow>, DomainError>;

    async fn save_institutional(
        &self,
        code: &str,
        flows: &[InstitutionalFlow],
    ) -> Result<(), DomainError>;
}

/// Cache of summarized news with expiry.
#[async_trait::async_trait]
pub trait NewsCachePort: Send + Sync {
    /// Newest unexpired entry for `code`.
    async fn cached_news(&self, code: &str) -> Result<Option<CachedNews>, DomainError>;

    async fn save_news(
        &self,
        code: &str,
        content: &str,
        source: &str,
        ttl_hours: i64,
    ) -> Result<(), DomainError>;
}

/// Query log plus cache maintenance.
#[async_trait::async_trait]
pub trait QueryLogPort: Send + Sync {
    async fn log_query(&self, code: &str, query_type: &str) -> Result<(), DomainError>;

    /// Query counts over the last `days`, most frequent first.
    async fn query_stats(&self, days: u32) -> Result<Vec<QueryStat>, DomainError>;

    async fn stats(&self) -> Result<CacheStats, DomainError>;

    /// Drop rows older than `days` plus expired news.
    async fn cleanup(&self, days: u32) -> Result<CleanupCounts, DomainError>;
}

/// Writes analysis artifacts. Returns the path of each file written.
#[async_trait::async_trait]
pub trait ReportStorePort: Send + Sync {
    async fn save_markdown(&self, file_name: &str, content: &str) -> Result<PathBuf, DomainError>;

    async fn save_indicators(
        &self,
        file_name: &str,
        frame: &TechnicalFrame,
    ) -> Result<PathBuf, DomainError>;
}

/// What an LLM call is for; selects model and sampling profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    NewsSearch,
    NewsSummary,
    Technical,
    Comprehensive,
    DeepResearch,
    Quick,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub task: TaskKind,
    pub messages: Vec<ChatMessage>,
    /// Restrict web search to these domains. Ignored for tasks without search.
    pub search_domains: Vec<String>,
}

impl CompletionRequest {
    pub fn new(task: TaskKind, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            task,
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            search_domains: Vec::new(),
        }
    }

    pub fn with_search_domains(mut self, domains: &[&str]) -> Self {
        self.search_domains = domains.iter().map(|d| d.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmReply {
    pub content: String,
    pub usage: Usage,
    pub model: String,
}

/// Chat-completion LLM (Perplexity).
#[async_trait::async_trait]
pub trait LlmPort: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<LlmReply, DomainError>;
}

/// Installs the dependency manifest into the runtime environment.
#[async_trait::async_trait]
pub trait InstallerPort: Send + Sync {
    async fn install(&self, env_dir: &Path, manifest: &Path) -> Result<(), DomainError>;
}

/// Runs the UI process in the foreground until it exits.
#[async_trait::async_trait]
pub trait UiProcessPort: Send + Sync {
    async fn run(&self, env_dir: &Path, port: u16) -> Result<(), DomainError>;
}

/// Persists the manifest modification time seen at the last install.
#[async_trait::async_trait]
pub trait InstallStampPort: Send + Sync {
    async fn load(&self) -> Result<Option<SystemTime>, DomainError>;

    async fn store(&self, manifest_mtime: SystemTime) -> Result<(), DomainError>;
}
