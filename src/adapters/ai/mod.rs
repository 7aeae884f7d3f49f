//! AI adapter module. Implements LlmPort.
//!
//! Provides the Perplexity adapter and a mock adapter for offline runs and tests.

pub mod mock_adapter;
pub mod perplexity_adapter;

pub use mock_adapter::MockLlmAdapter;
pub use perplexity_adapter::{DEFAULT_API_URL, PerplexityAdapter, RetryPolicy, TRUSTED_DOMAINS};
