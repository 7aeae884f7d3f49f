//! Application configuration. API credentials, paths, analysis defaults.

use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_UI_PORT: u16 = 8501;
pub const DEFAULT_ANALYSIS_DAYS: u32 = 60;
pub const DEFAULT_NEWS_TTL_HOURS: i64 = 24;

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    /// Cache database directory. Read from DAYTRADE_DATA_DIR.
    #[serde(default)]
    pub data_dir: Option<String>,

    /// Where markdown reports and indicator CSVs go. Read from DAYTRADE_REPORTS_DIR.
    #[serde(default)]
    pub reports_dir: Option<String>,

    // ─────────────────────────────────────────────────────────────────────────
    // Market data (FinMind)
    // ─────────────────────────────────────────────────────────────────────────
    /// FinMind token. Also read from FINMIND_TOKEN / FINMIND_API_TOKEN.
    #[serde(default)]
    pub finmind_token: Option<String>,

    #[serde(default)]
    pub finmind_base_url: Option<String>,

    // ─────────────────────────────────────────────────────────────────────────
    // LLM (Perplexity)
    // ─────────────────────────────────────────────────────────────────────────
    /// Perplexity key. Also read from PERPLEXITY_API_KEY.
    #[serde(default)]
    pub perplexity_api_key: Option<String>,

    #[serde(default)]
    pub perplexity_api_url: Option<String>,

    #[serde(default)]
    pub llm_timeout_secs: Option<u64>,

    /// Use canned replies instead of the API. Read from DAYTRADE_AI_MOCK.
    #[serde(default)]
    pub ai_mock: Option<bool>,

    #[serde(default)]
    pub news_ttl_hours: Option<i64>,

    // ─────────────────────────────────────────────────────────────────────────
    // Launcher
    // ─────────────────────────────────────────────────────────────────────────
    #[serde(default)]
    pub env_dir: Option<String>,

    #[serde(default)]
    pub manifest_path: Option<String>,

    /// Defaults to `<env_dir>/.deps-installed.json`.
    #[serde(default)]
    pub stamp_path: Option<String>,

    #[serde(default)]
    pub env_file: Option<String>,

    /// Script handed to the UI runner. Read from DAYTRADE_UI_ENTRY.
    #[serde(default)]
    pub ui_entry: Option<String>,

    #[serde(default)]
    pub ui_port: Option<u16>,

    // ─────────────────────────────────────────────────────────────────────────
    // Analysis defaults (form prefill)
    // ─────────────────────────────────────────────────────────────────────────
    #[serde(default)]
    pub analysis_days: Option<u32>,

    /// Broker commission discount in tenths (2.8 = 28% of list).
    #[serde(default)]
    pub fee_discount: Option<f64>,

    /// Transaction tax in percent (0.15 for day trades).
    #[serde(default)]
    pub tax_rate: Option<f64>,

    #[serde(default)]
    pub capital: Option<f64>,

    #[serde(default)]
    pub risk_percent: Option<f64>,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

fn env_var(key: &str) -> Option<String> {
    non_empty(std::env::var(key).ok())
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();
        let mut c = config::Config::builder();
        c = c.add_source(config::Environment::with_prefix("DAYTRADE").try_parsing(true));
        if let Ok(path) = std::env::var("DAYTRADE_CONFIG") {
            c = c.add_source(config::File::with_name(&path));
        }
        c.build()?.try_deserialize()
    }

    /// [`Self::load`], falling back to defaults with a warning.
    pub fn load_or_default() -> Self {
        Self::or_defaults(Self::load())
    }

    fn or_defaults(loaded: Result<Self, config::ConfigError>) -> Self {
        loaded.unwrap_or_else(|e| {
            warn!(error = %e, "config load failed, using defaults");
            Self::default()
        })
    }

    pub fn data_dir_or_default(&self) -> PathBuf {
        PathBuf::from(self.data_dir.as_deref().unwrap_or("./data"))
    }

    pub fn reports_dir_or_default(&self) -> PathBuf {
        PathBuf::from(self.reports_dir.as_deref().unwrap_or("./reports"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Secrets
    // ─────────────────────────────────────────────────────────────────────────

    /// FinMind token from config, FINMIND_TOKEN, then FINMIND_API_TOKEN.
    pub fn finmind_token(&self) -> Option<String> {
        non_empty(self.finmind_token.clone())
            .or_else(|| env_var("FINMIND_TOKEN"))
            .or_else(|| env_var("FINMIND_API_TOKEN"))
    }

    /// Perplexity key from config or PERPLEXITY_API_KEY.
    pub fn perplexity_api_key(&self) -> Option<String> {
        non_empty(self.perplexity_api_key.clone()).or_else(|| env_var("PERPLEXITY_API_KEY"))
    }

    pub fn finmind_base_url_or_default(&self) -> String {
        self.finmind_base_url
            .clone()
            .unwrap_or_else(|| crate::adapters::finmind::DEFAULT_BASE_URL.to_string())
    }

    pub fn perplexity_api_url_or_default(&self) -> String {
        self.perplexity_api_url
            .clone()
            .unwrap_or_else(|| crate::adapters::ai::DEFAULT_API_URL.to_string())
    }

    pub fn llm_timeout_secs_or_default(&self) -> u64 {
        self.llm_timeout_secs.unwrap_or(120)
    }

    pub fn ai_mock_or_default(&self) -> bool {
        self.ai_mock.unwrap_or(false)
    }

    pub fn news_ttl_hours_or_default(&self) -> i64 {
        self.news_ttl_hours.unwrap_or(DEFAULT_NEWS_TTL_HOURS)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Launcher
    // ─────────────────────────────────────────────────────────────────────────

    pub fn env_dir_or_default(&self) -> PathBuf {
        PathBuf::from(self.env_dir.as_deref().unwrap_or("venv"))
    }

    pub fn manifest_path_or_default(&self) -> PathBuf {
        PathBuf::from(self.manifest_path.as_deref().unwrap_or("requirements.txt"))
    }

    pub fn stamp_path_or_default(&self) -> PathBuf {
        self.stamp_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.env_dir_or_default().join(".deps-installed.json"))
    }

    pub fn env_file_or_default(&self) -> PathBuf {
        PathBuf::from(self.env_file.as_deref().unwrap_or(".env"))
    }

    pub fn ui_entry_or_default(&self) -> PathBuf {
        PathBuf::from(self.ui_entry.as_deref().unwrap_or("main.py"))
    }

    pub fn ui_port_or_default(&self) -> u16 {
        self.ui_port.unwrap_or(DEFAULT_UI_PORT)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Analysis defaults
    // ─────────────────────────────────────────────────────────────────────────

    pub fn analysis_days_or_default(&self) -> u32 {
        self.analysis_days.unwrap_or(DEFAULT_ANALYSIS_DAYS)
    }

    pub fn fee_discount_or_default(&self) -> f64 {
        self.fee_discount.unwrap_or(2.8)
    }

    pub fn tax_rate_or_default(&self) -> f64 {
        self.tax_rate.unwrap_or(0.15)
    }

    pub fn capital_or_default(&self) -> f64 {
        self.capital.unwrap_or(100_000.0)
    }

    pub fn risk_percent_or_default(&self) -> f64 {
        self.risk_percent.unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_failure_falls_back_to_defaults() {
        let cfg = AppConfig::or_defaults(Err(config::ConfigError::Message(
            "configuration file \"missing.toml\" not found".into(),
        )));
        assert_eq!(cfg.env_dir_or_default(), PathBuf::from("venv"));
        assert_eq!(cfg.ui_port_or_default(), DEFAULT_UI_PORT);
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.env_dir_or_default(), PathBuf::from("venv"));
        assert_eq!(
            cfg.stamp_path_or_default(),
            PathBuf::from("venv").join(".deps-installed.json")
        );
        assert_eq!(cfg.ui_port_or_default(), 8501);
        assert_eq!(cfg.analysis_days_or_default(), 60);
        assert_eq!(cfg.fee_discount_or_default(), 2.8);
        assert!(!cfg.ai_mock_or_default());
    }

    #[test]
    fn test_stamp_follows_env_dir() {
        let cfg = AppConfig {
            env_dir: Some(".venv".into()),
            ..Default::default()
        };
        assert_eq!(
            cfg.stamp_path_or_default(),
            PathBuf::from(".venv").join(".deps-installed.json")
        );
    }

    #[test]
    fn test_configured_secret_wins() {
        let cfg = AppConfig {
            finmind_token: Some("from-config".into()),
            perplexity_api_key: Some("pplx-config".into()),
            ..Default::default()
        };
        assert_eq!(cfg.finmind_token().as_deref(), Some("from-config"));
        assert_eq!(cfg.perplexity_api_key().as_deref(), Some("pplx-config"));
    }
}
