//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into these.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    /// The runtime environment directory is missing. Fatal for the launcher.
    #[error(
        "environment directory not found at {}; run the setup step first to create it",
        path.display()
    )]
    EnvironmentMissing { path: PathBuf },

    #[error("Dependency installation failed: {0}")]
    Install(String),

    #[error("UI process failed: {0}")]
    Launch(String),

    #[error("Install stamp error: {0}")]
    Stamp(String),

    #[error("Market data error: {0}")]
    MarketData(String),

    #[error("No market data returned for {symbol}")]
    NoData { symbol: String },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("LLM request failed: {0}")]
    Llm(String),

    /// 401 from the LLM provider. Not retried.
    #[error("LLM authentication failed: check PERPLEXITY_API_KEY")]
    LlmAuth,

    /// 429 from the LLM provider after all retries.
    #[error("LLM rate limit exceeded")]
    RateLimited,

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error("Prompt failed: {0}")]
    Prompt(String),
}
