//! Wiring & DI. Entry point: bootstrap adapters, inject into services, run UI.
//! No business logic here.

use anyhow::Context;
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use tw_daytrade::adapters::ai::{MockLlmAdapter, PerplexityAdapter, RetryPolicy};
use tw_daytrade::adapters::finmind::FinMindClient;
use tw_daytrade::adapters::persistence::{FsReportStore, SqliteCache};
use tw_daytrade::adapters::ui::tui::{TuiDefaults, TuiInputPort};
use tw_daytrade::ports::{
    InputPort, LlmPort, MarketDataPort, NewsCachePort, PriceCachePort, QueryLogPort,
    ReportStorePort,
};
use tw_daytrade::shared::config::AppConfig;
use tw_daytrade::usecases::{
    AdvisorService, AnalysisService, CacheService, MarketDataService, TradeParams,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_loaded = dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &env_loaded {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(_) => warn!("no .env found; FINMIND_TOKEN and PERPLEXITY_API_KEY must come from the environment"),
    }

    tw_daytrade::adapters::ui::init_ui();

    let cfg = AppConfig::load_or_default();

    // --- Cache (prices, institutional flows, news, query log) ---
    let data_dir = cfg.data_dir_or_default();
    let sqlite = Arc::new(
        SqliteCache::connect(&data_dir)
            .await
            .context("SQLite connect failed")?,
    );
    info!(path = %data_dir.display(), "cache ready");
    let price_cache: Arc<dyn PriceCachePort> = Arc::clone(&sqlite) as Arc<dyn PriceCachePort>;
    let news_cache: Arc<dyn NewsCachePort> = Arc::clone(&sqlite) as Arc<dyn NewsCachePort>;
    let query_log: Arc<dyn QueryLogPort> = Arc::clone(&sqlite) as Arc<dyn QueryLogPort>;

    // --- Market data ---
    let finmind_token = cfg.finmind_token();
    if finmind_token.is_none() {
        warn!("FINMIND_TOKEN not set; analysis is disabled until it is configured");
    }
    let market: Arc<dyn MarketDataPort> = Arc::new(
        FinMindClient::new(cfg.finmind_base_url_or_default(), finmind_token.clone())?,
    );

    // --- LLM advisor ---
    let llm: Option<Arc<dyn LlmPort>> = if cfg.ai_mock_or_default() {
        warn!("DAYTRADE_AI_MOCK set, using mock LLM adapter");
        Some(Arc::new(MockLlmAdapter::new()))
    } else if let Some(key) = cfg.perplexity_api_key() {
        info!(url = %cfg.perplexity_api_url_or_default(), "Perplexity advisor enabled");
        Some(Arc::new(
            PerplexityAdapter::new(
                cfg.perplexity_api_url_or_default(),
                key,
                Duration::from_secs(cfg.llm_timeout_secs_or_default()),
                RetryPolicy::default(),
            )?,
        ))
    } else {
        warn!("PERPLEXITY_API_KEY not set; news and AI analysis are disabled");
        None
    };

    // --- Services ---
    let market_service = Arc::new(MarketDataService::new(market, price_cache));
    let advisor = Arc::new(AdvisorService::new(
        llm,
        news_cache,
        cfg.news_ttl_hours_or_default(),
    ));
    let reports: Arc<dyn ReportStorePort> =
        Arc::new(FsReportStore::new(cfg.reports_dir_or_default()));
    let analysis = Arc::new(AnalysisService::new(
        Arc::clone(&market_service),
        Arc::clone(&advisor),
        Arc::clone(&query_log),
        reports,
        finmind_token,
    ));
    let cache_service = Arc::new(CacheService::new(query_log));

    let defaults = TuiDefaults {
        analysis_days: cfg.analysis_days_or_default(),
        params: TradeParams {
            fee_discount: cfg.fee_discount_or_default(),
            tax_rate: cfg.tax_rate_or_default(),
            capital: cfg.capital_or_default(),
            risk_percent: cfg.risk_percent_or_default(),
        },
    };
    let input_port: Arc<dyn InputPort> = Arc::new(TuiInputPort::new(
        analysis,
        market_service,
        cache_service,
        advisor,
        defaults,
    ));

    // --- Run (main menu) ---
    input_port.run().await?;

    Ok(())
}
