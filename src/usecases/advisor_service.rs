//! Advisor service. LLM news digests and day-trading reports.
//!
//! News runs in two stages (search, then summary) behind a 24-hour cache.
//! Reports select a model by mode, send a compact data digest and append a
//! token usage footer. Any LLM failure degrades to a rule-based report.

use super::prompts;
use crate::adapters::ai::TRUSTED_DOMAINS;
use crate::domain::{
    DomainError, InstitutionalFlow, NewsDigest, NewsOrigin, PriceLevel, SupportResistance,
    TechnicalFrame,
};
use crate::ports::{CompletionRequest, LlmPort, LlmReply, NewsCachePort, TaskKind, Usage};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Words in a search result that mark a material event.
pub const IMPORTANT_KEYWORDS: &[&str] = &[
    "財報", "併購", "重訊", "法說", "增資", "減資", "停牌", "董事會",
];

const NEWS_PROMPT_CHARS: usize = 300;
const NEWS_SOURCE: &str = "perplexity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisMode {
    Quick,
    #[default]
    Comprehensive,
    Deep,
}

impl AnalysisMode {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Quick => "⚡ 快速分析",
            Self::Comprehensive => "📊 完整分析",
            Self::Deep => "🔬 深度分析",
        }
    }
}

/// Model task for a report. Quick mode upgrades to the reasoning model when
/// real news is attached; comprehensive mode falls back to it without news.
pub fn select_task(mode: AnalysisMode, has_news: bool) -> TaskKind {
    match (mode, has_news) {
        (AnalysisMode::Deep, _) => TaskKind::DeepResearch,
        (AnalysisMode::Quick, false) => TaskKind::Quick,
        (AnalysisMode::Quick, true) => TaskKind::Technical,
        (AnalysisMode::Comprehensive, true) => TaskKind::Comprehensive,
        (AnalysisMode::Comprehensive, false) => TaskKind::Technical,
    }
}

/// Account and cost parameters from the analysis form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeParams {
    pub fee_discount: f64,
    pub tax_rate: f64,
    pub capital: f64,
    pub risk_percent: f64,
}

impl Default for TradeParams {
    fn default() -> Self {
        Self {
            fee_discount: 2.8,
            tax_rate: 0.15,
            capital: 100_000.0,
            risk_percent: 1.0,
        }
    }
}

/// Everything a report needs.
pub struct AdvisorInput<'a> {
    pub symbol: &'a str,
    pub frame: &'a TechnicalFrame,
    pub today_open: f64,
    pub yesterday_close: f64,
    pub levels: &'a SupportResistance,
    /// Newest first.
    pub institutional: &'a [InstitutionalFlow],
    pub news: Option<&'a NewsDigest>,
    pub mode: AnalysisMode,
    pub params: TradeParams,
}

/// Latest indicator values; absent values read as 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyIndicators {
    pub close: f64,
    pub ma5: f64,
    pub ma20: f64,
    pub ma60: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub kd_k: f64,
    pub kd_d: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub volume: f64,
    /// Latest volume over the mean volume of the frame.
    pub volume_ratio: f64,
}

/// Trimmed-down view of the market data sent to the LLM.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactData {
    pub symbol: String,
    pub yesterday_close: f64,
    pub today_open: f64,
    pub gap_percent: f64,
    pub indicators: KeyIndicators,
    pub resistance: Vec<PriceLevel>,
    pub support: Vec<PriceLevel>,
    pub institutional_summary: Option<String>,
    pub news_content: Option<String>,
    pub has_news: bool,
}

impl CompactData {
    pub fn gap_direction(&self) -> &'static str {
        if self.today_open > self.yesterday_close {
            "向上"
        } else {
            "向下"
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

pub fn compact_data(input: &AdvisorInput<'_>) -> CompactData {
    let gap_percent = if input.yesterday_close > 0.0 {
        (input.today_open - input.yesterday_close) / input.yesterday_close * 100.0
    } else {
        0.0
    };

    let indicators = input
        .frame
        .latest()
        .map(|(bar, row)| {
            let v = |x: Option<f64>| x.unwrap_or(0.0);
            let mean = input.frame.mean_volume();
            KeyIndicators {
                close: bar.close,
                ma5: v(row.ma5),
                ma20: v(row.ma20),
                ma60: v(row.ma60),
                rsi: v(row.rsi),
                macd: v(row.macd),
                macd_signal: v(row.macd_signal),
                kd_k: v(row.kd_k),
                kd_d: v(row.kd_d),
                bb_upper: v(row.bb_upper),
                bb_middle: v(row.bb_middle),
                bb_lower: v(row.bb_lower),
                volume: bar.volume,
                volume_ratio: if mean > 0.0 { bar.volume / mean } else { 1.0 },
            }
        })
        .unwrap_or_else(|| KeyIndicators {
            volume_ratio: 1.0,
            ..KeyIndicators::default()
        });

    let institutional_summary = input.institutional.first().and_then(|f| {
        (f.foreign_investor.abs() > 1000.0 || f.investment_trust.abs() > 500.0).then(|| {
            format!(
                "外資 {}張, 投信 {}張, 自營 {}張",
                prompts::group_thousands(f.foreign_investor, true),
                prompts::group_thousands(f.investment_trust, true),
                prompts::group_thousands(f.dealer_total, true),
            )
        })
    });

    let has_news = input.news.is_some_and(|n| !n.is_fallback());
    let news_content = input
        .news
        .filter(|n| has_news && !n.content.is_empty())
        .map(|n| truncate_chars(&n.content, NEWS_PROMPT_CHARS));

    CompactData {
        symbol: input.symbol.to_string(),
        yesterday_close: input.yesterday_close,
        today_open: input.today_open,
        gap_percent,
        indicators,
        resistance: input.levels.resistance.iter().take(2).cloned().collect(),
        support: input.levels.support.iter().take(2).cloned().collect(),
        institutional_summary,
        news_content,
        has_news,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelUsage {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Token totals across calls, overall and per model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenLedger {
    pub total: Usage,
    pub by_model: BTreeMap<String, ModelUsage>,
}

impl TokenLedger {
    pub fn record(&mut self, model: &str, usage: Usage) {
        self.total.prompt_tokens += usage.prompt_tokens;
        self.total.completion_tokens += usage.completion_tokens;
        self.total.total_tokens += usage.total_tokens;
        let entry = self.by_model.entry(model.to_string()).or_default();
        entry.calls += 1;
        entry.prompt_tokens += usage.prompt_tokens;
        entry.completion_tokens += usage.completion_tokens;
        entry.total_tokens += usage.total_tokens;
    }

    /// Plain-text usage table with per-model averages.
    pub fn report(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = format!(
            "{rule}\n📊 Token 使用報告\n{rule}\n\n總計:\n  Prompt Tokens:     {:>10}\n  Completion Tokens: {:>10}\n  Total Tokens:      {:>10}\n",
            self.total.prompt_tokens, self.total.completion_tokens, self.total.total_tokens
        );
        if !self.by_model.is_empty() {
            out.push_str("\n按模型分類:\n");
            for (model, u) in &self.by_model {
                let avg = u.total_tokens.checked_div(u.calls).unwrap_or(0);
                out.push_str(&format!(
                    "\n  {model}:\n    調用次數:   {:>3}\n    Total:      {:>10} tokens\n    平均每次:   {:>10} tokens\n",
                    u.calls, u.total_tokens, avg
                ));
            }
        }
        out.push_str(&rule);
        out
    }
}

pub struct AdvisorService {
    llm: Option<Arc<dyn LlmPort>>,
    news_cache: Arc<dyn NewsCachePort>,
    news_ttl_hours: i64,
    ledger: Mutex<TokenLedger>,
}

impl AdvisorService {
    /// # Arguments
    /// * `llm` - `None` when no API key is configured; reports then explain setup
    /// * `news_cache` - summarized news cache
    /// * `news_ttl_hours` - how long a cached digest stays valid
    pub fn new(
        llm: Option<Arc<dyn LlmPort>>,
        news_cache: Arc<dyn NewsCachePort>,
        news_ttl_hours: i64,
    ) -> Self {
        Self {
            llm,
            news_cache,
            news_ttl_hours,
            ledger: Mutex::new(TokenLedger::default()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.llm.is_some()
    }

    async fn call(&self, llm: &dyn LlmPort, request: CompletionRequest) -> Result<LlmReply, DomainError> {
        let reply = llm.complete(request).await?;
        if let Ok(mut ledger) = self.ledger.lock() {
            ledger.record(&reply.model, reply.usage);
        }
        Ok(reply)
    }

    fn fallback_news(symbol: &str) -> NewsDigest {
        NewsDigest {
            content: prompts::fallback_news(symbol),
            origin: NewsOrigin::Fallback,
            model: "fallback".to_string(),
            has_important_event: false,
            fetched_at: None,
        }
    }

    /// Recent news for `symbol`. Never fails: errors become a fallback digest.
    pub async fn search_news(&self, symbol: &str, force: bool, deep: bool) -> NewsDigest {
        if !force {
            match self.news_cache.cached_news(symbol).await {
                Ok(Some(cached)) => {
                    info!(symbol, "news served from cache");
                    return NewsDigest {
                        content: cached.content,
                        origin: NewsOrigin::Cache,
                        model: "cache".to_string(),
                        has_important_event: false,
                        fetched_at: None,
                    };
                }
                Ok(None) => {}
                Err(e) => warn!(symbol, error = %e, "news cache read failed"),
            }
        }

        let Some(llm) = self.llm.as_deref() else {
            warn!("PERPLEXITY_API_KEY not set, using fallback news");
            return Self::fallback_news(symbol);
        };

        match self.fetch_news(llm, symbol, deep).await {
            Ok(digest) => digest,
            Err(e) => {
                warn!(symbol, error = %e, "news search failed, using fallback");
                Self::fallback_news(symbol)
            }
        }
    }

    async fn fetch_news(
        &self,
        llm: &dyn LlmPort,
        symbol: &str,
        deep: bool,
    ) -> Result<NewsDigest, DomainError> {
        info!(symbol, "news stage 1: search");
        let search = self
            .call(
                llm,
                CompletionRequest::new(
                    TaskKind::NewsSearch,
                    prompts::NEWS_SEARCH_SYSTEM,
                    prompts::news_search_prompt(symbol),
                )
                .with_search_domains(TRUSTED_DOMAINS),
            )
            .await?;

        let has_important_event = IMPORTANT_KEYWORDS
            .iter()
            .any(|k| search.content.contains(k));
        let task = if deep && has_important_event {
            TaskKind::DeepResearch
        } else {
            TaskKind::NewsSummary
        };
        info!(symbol, has_important_event, task = ?task, "news stage 2: summary");

        let summary = self
            .call(
                llm,
                CompletionRequest::new(
                    task,
                    prompts::NEWS_SUMMARY_SYSTEM,
                    prompts::news_summary_prompt(symbol, &search.content),
                ),
            )
            .await?;

        if let Err(e) = self
            .news_cache
            .save_news(symbol, &summary.content, NEWS_SOURCE, self.news_ttl_hours)
            .await
        {
            warn!(symbol, error = %e, "news cache write failed");
        }

        Ok(NewsDigest {
            content: summary.content,
            origin: NewsOrigin::Api,
            model: summary.model,
            has_important_event,
            fetched_at: Some(chrono::Utc::now().timestamp()),
        })
    }

    /// Markdown day-trading report: header, LLM analysis, token footer.
    pub async fn daytrading_report(&self, input: &AdvisorInput<'_>) -> String {
        let Some(llm) = self.llm.as_deref() else {
            return prompts::NO_API_KEY_MESSAGE.to_string();
        };

        let data = compact_data(input);
        let task = select_task(input.mode, data.has_news);
        info!(symbol = input.symbol, mode = ?input.mode, task = ?task, "generating report");

        let request = CompletionRequest::new(
            task,
            prompts::system_prompt(input.mode, data.has_news),
            prompts::user_prompt(input.mode, &data, &input.params),
        );
        match self.call(llm, request).await {
            Ok(reply) => {
                let header = prompts::report_header(input.mode, data.has_news, &reply.model);
                let footer = prompts::token_footer(&self.token_usage());
                format!("{header}{}\n\n{footer}", reply.content)
            }
            Err(e) => {
                warn!(symbol = input.symbol, error = %e, "LLM analysis failed, using fallback report");
                prompts::fallback_analysis(&data)
            }
        }
    }

    pub fn token_usage(&self) -> TokenLedger {
        self.ledger.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn reset_token_usage(&self) {
        if let Ok(mut l) = self.ledger.lock() {
            *l = TokenLedger::default();
        }
    }

    pub fn token_report(&self) -> String {
        self.token_usage().report()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::{CachedNews, DomainError};
    use crate::ports::NewsCachePort;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// News cache in a map; entries never expire.
    #[derive(Default)]
    pub struct MemoryNewsCache {
        pub entries: Mutex<HashMap<String, CachedNews>>,
    }

    #[async_trait::async_trait]
    impl NewsCachePort for MemoryNewsCache {
        async fn cached_news(&self, code: &str) -> Result<Option<CachedNews>, DomainError> {
            Ok(self.entries.lock().unwrap().get(code).cloned())
        }

        async fn save_news(
            &self,
            code: &str,
            content: &str,
            source: &str,
            _ttl_hours: i64,
        ) -> Result<(), DomainError> {
            self.entries.lock().unwrap().insert(
                code.to_string(),
                CachedNews {
                    content: content.to_string(),
                    source: source.to_string(),
                    created_at: 0,
                },
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MemoryNewsCache;
    use super::*;
    use crate::adapters::ai::MockLlmAdapter;
    use crate::domain::indicators::test_support::{bars_from_closes, wave};
    use crate::domain::{compute_indicators, support_resistance};
    use chrono::NaiveDate;

    fn service(llm: Option<Arc<MockLlmAdapter>>) -> (AdvisorService, Arc<MemoryNewsCache>) {
        let cache = Arc::new(MemoryNewsCache::default());
        let llm = llm.map(|l| l as Arc<dyn LlmPort>);
        (AdvisorService::new(llm, cache.clone(), 24), cache)
    }

    fn flow(foreign: f64, trust: f64) -> InstitutionalFlow {
        InstitutionalFlow {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            foreign_investor: foreign,
            investment_trust: trust,
            dealer_total: 12.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_select_task() {
        assert_eq!(select_task(AnalysisMode::Deep, false), TaskKind::DeepResearch);
        assert_eq!(select_task(AnalysisMode::Quick, false), TaskKind::Quick);
        assert_eq!(select_task(AnalysisMode::Quick, true), TaskKind::Technical);
        assert_eq!(select_task(AnalysisMode::Comprehensive, true), TaskKind::Comprehensive);
        assert_eq!(select_task(AnalysisMode::Comprehensive, false), TaskKind::Technical);
    }

    #[test]
    fn test_compact_data_institutional_threshold_and_news_truncation() {
        let frame = compute_indicators(bars_from_closes(&wave(40)));
        let levels = support_resistance(&frame, 3);
        let news = NewsDigest {
            content: "新".repeat(400),
            origin: NewsOrigin::Api,
            model: "sonar".into(),
            has_important_event: false,
            fetched_at: None,
        };
        let quiet = [flow(900.0, 400.0)];
        let busy = [flow(-1500.0, 0.0)];
        let mut input = AdvisorInput {
            symbol: "2330",
            frame: &frame,
            today_open: 105.0,
            yesterday_close: 100.0,
            levels: &levels,
            institutional: &quiet,
            news: Some(&news),
            mode: AnalysisMode::Comprehensive,
            params: TradeParams::default(),
        };

        let data = compact_data(&input);
        assert!((data.gap_percent - 5.0).abs() < 1e-9);
        assert_eq!(data.gap_direction(), "向上");
        assert!(data.institutional_summary.is_none());
        assert!(data.has_news);
        assert_eq!(data.news_content.as_ref().unwrap().chars().count(), 303);
        assert!(data.resistance.len() <= 2);

        input.institutional = &busy;
        let data = compact_data(&input);
        assert_eq!(
            data.institutional_summary.as_deref(),
            Some("外資 -1,500張, 投信 +0張, 自營 +12張")
        );
    }

    #[test]
    fn test_fallback_news_is_not_news() {
        let frame = compute_indicators(bars_from_closes(&wave(10)));
        let levels = SupportResistance::default();
        let news = AdvisorService::fallback_news("2330");
        let input = AdvisorInput {
            symbol: "2330",
            frame: &frame,
            today_open: 100.0,
            yesterday_close: 0.0,
            levels: &levels,
            institutional: &[],
            news: Some(&news),
            mode: AnalysisMode::Quick,
            params: TradeParams::default(),
        };
        let data = compact_data(&input);
        assert!(!data.has_news);
        assert!(data.news_content.is_none());
        assert_eq!(data.gap_percent, 0.0);
    }

    #[tokio::test]
    async fn test_search_news_two_stages_then_cache() {
        let llm = Arc::new(MockLlmAdapter::with_delay(0));
        let (svc, cache) = service(Some(llm.clone()));

        let digest = svc.search_news("2330", false, false).await;
        assert_eq!(digest.origin, NewsOrigin::Api);
        assert!(digest.has_important_event);
        assert_eq!(llm.calls(), vec![TaskKind::NewsSearch, TaskKind::NewsSummary]);
        assert_eq!(cache.entries.lock().unwrap()["2330"].source, "perplexity");

        let again = svc.search_news("2330", false, false).await;
        assert_eq!(again.origin, NewsOrigin::Cache);
        assert_eq!(llm.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_deep_news_uses_research_on_important_event() {
        let llm = Arc::new(MockLlmAdapter::with_delay(0));
        let (svc, _) = service(Some(llm.clone()));
        svc.search_news("2330", true, true).await;
        assert_eq!(llm.calls(), vec![TaskKind::NewsSearch, TaskKind::DeepResearch]);
    }

    #[tokio::test]
    async fn test_news_without_llm_or_on_failure_is_fallback() {
        let (svc, _) = service(None);
        assert!(svc.search_news("2330", false, false).await.is_fallback());

        let (svc, cache) = service(Some(Arc::new(MockLlmAdapter::failing())));
        assert!(svc.search_news("2330", true, false).await.is_fallback());
        assert!(cache.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_report_header_footer_and_ledger() {
        let llm = Arc::new(MockLlmAdapter::with_delay(0));
        let (svc, _) = service(Some(llm.clone()));
        let frame = compute_indicators(bars_from_closes(&wave(40)));
        let levels = support_resistance(&frame, 3);
        let input = AdvisorInput {
            symbol: "2330",
            frame: &frame,
            today_open: 110.0,
            yesterday_close: 109.0,
            levels: &levels,
            institutional: &[],
            news: None,
            mode: AnalysisMode::Comprehensive,
            params: TradeParams::default(),
        };

        let report = svc.daytrading_report(&input).await;
        assert!(report.starts_with("## 📊 完整分析模式（技術面 + 籌碼面）\n**使用模型**: sonar-reasoning"));
        assert!(report.contains("### 💰 Token 使用統計"));
        assert!(report.contains("*sonar-reasoning* (1 次調用)"));
        assert_eq!(llm.calls(), vec![TaskKind::Technical]);

        let ledger = svc.token_usage();
        assert_eq!(ledger.by_model["sonar-reasoning"].calls, 1);
        assert!(svc.token_report().contains("平均每次"));
        svc.reset_token_usage();
        assert_eq!(svc.token_usage(), TokenLedger::default());
    }

    #[tokio::test]
    async fn test_report_fallbacks() {
        let frame = compute_indicators(bars_from_closes(&wave(30)));
        let levels = support_resistance(&frame, 3);
        let input = AdvisorInput {
            symbol: "2330",
            frame: &frame,
            today_open: 100.0,
            yesterday_close: 100.0,
            levels: &levels,
            institutional: &[],
            news: None,
            mode: AnalysisMode::Quick,
            params: TradeParams::default(),
        };

        let (svc, _) = service(None);
        assert!(svc.daytrading_report(&input).await.contains("PERPLEXITY_API_KEY"));

        let (svc, _) = service(Some(Arc::new(MockLlmAdapter::failing())));
        let report = svc.daytrading_report(&input).await;
        assert!(report.starts_with("## ⚠️ AI 分析暫時無法使用"));
        assert!(report.contains("開盤缺口：+0.00%"));
    }
}
