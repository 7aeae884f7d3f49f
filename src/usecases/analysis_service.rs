//! Analysis service. Runs the full day-trading pipeline for one stock.
//!
//! Prices are required; institutional flows, margin and news are best
//! effort. The outcome is written as a Markdown report plus an indicator CSV.

use super::advisor_service::{AdvisorInput, AdvisorService, AnalysisMode, TradeParams};
use super::market_data_service::MarketDataService;
use super::prompts::group_thousands;
use crate::domain::risk::{format_currency, position_size, round_trip_cost_percent, validate_inputs};
use crate::domain::signals::Divergence;
use crate::domain::{
    DayTradingSignals, DomainError, InstitutionalFlow, InstitutionalTotals, MarginBalance,
    NewsDigest, SignalSummary, StockId, StopPlan, SupportResistance, TechnicalFrame,
    compute_indicators, daytrading_signals, signal_summary, stop_plan, support_resistance,
};
use crate::ports::{QueryLogPort, ReportStorePort};
use chrono::{Days, Local, NaiveDate};
use std::fmt::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Calendar days fetched on top of the analysis window so long indicators
/// have warmed up.
const WARMUP_DAYS: u32 = 30;
const LEVEL_COUNT: usize = 3;
const RISK_REWARD: f64 = 2.0;
const INSTITUTIONAL_WINDOW: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub symbol: String,
    pub today_open: f64,
    /// Used when > 0; otherwise the last close in the data.
    pub yesterday_close: f64,
    pub analysis_days: u32,
    pub force_update: bool,
    pub include_news: bool,
    pub deep_news: bool,
    pub mode: AnalysisMode,
    pub params: TradeParams,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub stock: StockId,
    pub as_of: NaiveDate,
    pub today_open: f64,
    pub yesterday_close: f64,
    pub frame: TechnicalFrame,
    pub levels: SupportResistance,
    pub signals: Option<DayTradingSignals>,
    pub summary: SignalSummary,
    /// `None` while ATR is warming up.
    pub stop_plan: Option<StopPlan>,
    pub position_size: u64,
    pub cost_percent: f64,
    /// Newest first.
    pub institutional: Vec<InstitutionalFlow>,
    pub institutional_totals: InstitutionalTotals,
    pub margin: Option<MarginBalance>,
    pub news: Option<NewsDigest>,
    pub ai_report: String,
    pub report_path: PathBuf,
    pub csv_path: PathBuf,
}

pub struct AnalysisService {
    market: Arc<MarketDataService>,
    advisor: Arc<AdvisorService>,
    log: Arc<dyn QueryLogPort>,
    reports: Arc<dyn ReportStorePort>,
    market_token: Option<String>,
}

impl AnalysisService {
    /// # Arguments
    /// * `market_token` - FinMind token; analysis refuses to start without one
    pub fn new(
        market: Arc<MarketDataService>,
        advisor: Arc<AdvisorService>,
        log: Arc<dyn QueryLogPort>,
        reports: Arc<dyn ReportStorePort>,
        market_token: Option<String>,
    ) -> Self {
        Self {
            market,
            advisor,
            log,
            reports,
            market_token,
        }
    }

    pub async fn run(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome, DomainError> {
        validate_inputs(
            &request.symbol,
            request.today_open,
            self.market_token.as_deref(),
            self.advisor.is_available(),
        )?;

        let stock = StockId::parse(&request.symbol);
        info!(stock = %stock, mode = ?request.mode, news = request.include_news, "starting analysis");
        if let Err(e) = self.log.log_query(&stock.code, "analysis").await {
            warn!(error = %e, "query log write failed");
        }

        let today = Local::now().date_naive();
        let start = today
            .checked_sub_days(Days::new(u64::from(request.analysis_days + WARMUP_DAYS)))
            .unwrap_or(today);

        let bars = self
            .market
            .prices(&stock.code, start, today, request.force_update)
            .await?;
        info!(rows = bars.len(), "price data ready");

        let frame = compute_indicators(bars);
        let levels = support_resistance(&frame, LEVEL_COUNT);
        let signals = daytrading_signals(&frame);
        let summary = signal_summary(&frame);

        let institutional = match self
            .market
            .institutional(&stock.code, start, today, request.force_update)
            .await
        {
            Ok(flows) => flows,
            Err(e) => {
                warn!(error = %e, "institutional data unavailable, continuing");
                Vec::new()
            }
        };
        let institutional_totals =
            InstitutionalTotals::from_recent(&institutional, INSTITUTIONAL_WINDOW);

        let margin = match self.market.latest_margin(&stock.code, start, today).await {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "margin data unavailable, continuing");
                None
            }
        };

        let news = if request.include_news {
            Some(
                self.advisor
                    .search_news(&stock.code, request.force_update, request.deep_news)
                    .await,
            )
        } else {
            None
        };

        let (as_of, last_close) = frame
            .latest()
            .map(|(bar, _)| (bar.date, bar.close))
            .unwrap_or((today, 0.0));
        let yesterday_close = if request.yesterday_close > 0.0 {
            request.yesterday_close
        } else {
            last_close
        };

        let ai_report = self
            .advisor
            .daytrading_report(&AdvisorInput {
                symbol: &stock.code,
                frame: &frame,
                today_open: request.today_open,
                yesterday_close,
                levels: &levels,
                institutional: &institutional,
                news: news.as_ref(),
                mode: request.mode,
                params: request.params,
            })
            .await;

        // Anchored on the latest close, not the open.
        let plan = frame
            .latest()
            .and_then(|(_, row)| row.atr)
            .filter(|atr| *atr > 0.0)
            .map(|atr| stop_plan(last_close, atr, RISK_REWARD));
        let risk_budget = request.params.capital * request.params.risk_percent / 100.0;
        let shares = plan
            .map(|p| position_size(last_close, p.stop_loss, risk_budget))
            .unwrap_or(0);

        let mut outcome = AnalysisOutcome {
            stock,
            as_of,
            today_open: request.today_open,
            yesterday_close,
            frame,
            levels,
            signals,
            summary,
            stop_plan: plan,
            position_size: shares,
            cost_percent: round_trip_cost_percent(
                request.params.fee_discount,
                request.params.tax_rate,
            ),
            institutional,
            institutional_totals,
            margin,
            news,
            ai_report,
            report_path: PathBuf::new(),
            csv_path: PathBuf::new(),
        };

        let stamp = today.format("%Y%m%d");
        let code = outcome.stock.code.clone();
        outcome.report_path = self
            .reports
            .save_markdown(
                &format!("analysis_{}_{}.md", code, stamp),
                &render_markdown(&outcome),
            )
            .await?;
        outcome.csv_path = self
            .reports
            .save_indicators(&format!("indicators_{}_{}.csv", code, stamp), &outcome.frame)
            .await?;

        info!(
            report = %outcome.report_path.display(),
            csv = %outcome.csv_path.display(),
            "analysis complete"
        );
        Ok(outcome)
    }
}

fn latest_cross(golden: &[(NaiveDate, f64)], death: &[(NaiveDate, f64)]) -> String {
    match (golden.last(), death.last()) {
        (Some(g), Some(d)) if d.0 > g.0 => format!("🔴 死亡交叉 ({}, NT$ {:.2})", d.0, d.1),
        (Some(g), _) => format!("🟢 黃金交叉 ({}, NT$ {:.2})", g.0, g.1),
        (None, Some(d)) => format!("🔴 死亡交叉 ({}, NT$ {:.2})", d.0, d.1),
        (None, None) => "⚪ 無明顯訊號".to_string(),
    }
}

fn zone(high: bool, low: bool, high_text: &str, low_text: &str) -> String {
    if high {
        format!("⚠️ {high_text}")
    } else if low {
        format!("💡 {low_text}")
    } else {
        "✅ 正常".to_string()
    }
}

fn net_label(v: f64) -> &'static str {
    if v > 0.0 {
        "買超"
    } else if v < 0.0 {
        "賣超"
    } else {
        "持平"
    }
}

/// Full Markdown report for an outcome.
pub fn render_markdown(o: &AnalysisOutcome) -> String {
    let mut md = format!(
        "# {} 當沖分析報告\n\n**資料日期:** {} | **今日開盤:** NT$ {:.2} | **昨日收盤:** NT$ {:.2}\n\n---\n\n",
        o.stock, o.as_of, o.today_open, o.yesterday_close
    );

    if let Some(s) = &o.signals {
        let _ = write!(
            md,
            "## 🎯 當沖訊號\n\n- **建議:** {} ({})\n- **訊號強度:** {}\n",
            s.recommendation.label(),
            s.recommendation,
            s.strength
        );
        for line in &s.signals {
            let _ = writeln!(md, "- {}", line);
        }
        md.push('\n');
    }

    let sm = &o.summary;
    let _ = write!(
        md,
        "## 📊 技術訊號摘要\n\n\
         - **均線:** {}\n\
         - **KD 交叉:** {}\n\
         - **MACD:** {}\n\
         - **RSI:** {}\n\
         - **KD:** {}\n\
         - **威廉指標:** {}\n\
         - **CCI:** {}\n\
         - **ADX:** {}\n\
         - **OBV:** {}\n\n",
        latest_cross(&sm.ma_golden_cross, &sm.ma_death_cross),
        latest_cross(&sm.kd_golden_cross, &sm.kd_death_cross),
        latest_cross(&sm.macd_golden_cross, &sm.macd_death_cross),
        zone(sm.rsi_overbought, sm.rsi_oversold, "超買 (>70)", "超賣 (<30)"),
        zone(sm.kd_overbought, sm.kd_oversold, "超買 (>80)", "超賣 (<20)"),
        zone(sm.williams_overbought, sm.williams_oversold, "超買 (>-20)", "超賣 (<-80)"),
        zone(sm.cci_overbought, sm.cci_oversold, "超買 (>100)", "超賣 (<-100)"),
        if sm.adx_strong_trend { "📈 趨勢明確 (>25)" } else { "➖ 盤整" },
        match sm.obv_divergence {
            Some(Divergence::Bearish) => "🔴 量價背離 (看跌)",
            Some(Divergence::Bullish) => "🟢 量價背離 (看漲)",
            None => "無背離",
        },
    );

    if let Some((bar, row)) = o.frame.latest() {
        let _ = write!(
            md,
            "## 💰 最新價格資訊\n\n\
             | 收盤價 | 成交量 | RSI | KD (K/D) | MACD | ATR |\n\
             |--------|--------|-----|----------|------|-----|\n\
             | NT$ {:.2} | {} | {} | {} / {} | {} | {} |\n\n",
            bar.close,
            group_thousands(bar.volume, false),
            fmt_opt(row.rsi),
            fmt_opt(row.kd_k),
            fmt_opt(row.kd_d),
            fmt_opt(row.macd),
            fmt_opt(row.atr),
        );
    }

    md.push_str("## 📍 支撐壓力位\n\n**壓力位:**\n");
    if o.levels.resistance.is_empty() {
        md.push_str("- 無明顯壓力位\n");
    }
    for l in &o.levels.resistance {
        let _ = writeln!(md, "- NT$ {:.2} - {} ({})", l.price, l.label, l.strength.label());
    }
    md.push_str("\n**支撐位:**\n");
    if o.levels.support.is_empty() {
        md.push_str("- 無明顯支撐位\n");
    }
    for l in &o.levels.support {
        let _ = writeln!(md, "- NT$ {:.2} - {} ({})", l.price, l.label, l.strength.label());
    }
    md.push('\n');

    if let Some(p) = &o.stop_plan {
        let _ = write!(
            md,
            "## 🛡️ 停損停利 (ATR)\n\n\
             - **停損:** {} (保守 {} / 積極 {})\n\
             - **停利:** {} (風報比 1:{})\n\
             - **建議股數:** {} 股\n\
             - **來回交易成本:** {:.4}%\n\n",
            format_currency(p.stop_loss),
            format_currency(p.conservative_stop),
            format_currency(p.aggressive_stop),
            format_currency(p.take_profit),
            p.risk_reward_ratio,
            o.position_size,
            o.cost_percent,
        );
    }

    let t = &o.institutional_totals;
    if t.days > 0 {
        let _ = write!(
            md,
            "## 💼 三大法人買賣超 (最近{}天)\n\n\
             | 外資 | 投信 | 自營商 | 合計 |\n\
             |------|------|--------|------|\n\
             | {} 張 ({}) | {} 張 ({}) | {} 張 ({}) | {} 張 ({}) |\n\n",
            t.days,
            group_thousands(t.foreign_investor, false),
            net_label(t.foreign_investor),
            group_thousands(t.investment_trust, false),
            net_label(t.investment_trust),
            group_thousands(t.dealer_total, false),
            net_label(t.dealer_total),
            group_thousands(t.total, false),
            net_label(t.total),
        );
    }

    if let Some(m) = &o.margin {
        let _ = write!(
            md,
            "## 🏦 融資融券 ({})\n\n- 融資餘額: {} 張\n- 融券餘額: {} 張\n\n",
            m.date,
            group_thousands(m.margin_purchase_balance, false),
            group_thousands(m.short_sale_balance, false),
        );
    }

    if let Some(n) = &o.news {
        let _ = write!(md, "## 📰 近期新聞事件\n\n{}\n\n", n.content);
    }

    let _ = write!(md, "## 🤖 AI 當沖分析報告\n\n{}\n", o.ai_report);
    md
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ai::MockLlmAdapter;
    use crate::adapters::persistence::{FsReportStore, SqliteCache};
    use crate::domain::indicators::test_support::{bars_from_closes, wave};
    use crate::ports::LlmPort;
    use crate::usecases::advisor_service::test_support::MemoryNewsCache;
    use crate::usecases::market_data_service::test_support::{FakeMarket, MemoryPriceCache};

    struct Harness {
        _dir: tempfile::TempDir,
        reports_dir: PathBuf,
        service: AnalysisService,
        cache: Arc<SqliteCache>,
    }

    async fn harness(market: FakeMarket, token: Option<&str>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(SqliteCache::connect(dir.path().join("data")).await.unwrap());
        let reports_dir = dir.path().join("reports");
        let llm: Arc<dyn LlmPort> = Arc::new(MockLlmAdapter::with_delay(0));
        let service = AnalysisService::new(
            Arc::new(MarketDataService::new(
                Arc::new(market),
                Arc::new(MemoryPriceCache::default()),
            )),
            Arc::new(AdvisorService::new(
                Some(llm),
                Arc::new(MemoryNewsCache::default()),
                24,
            )),
            cache.clone(),
            Arc::new(FsReportStore::new(&reports_dir)),
            token.map(str::to_string),
        );
        Harness {
            _dir: dir,
            reports_dir,
            service,
            cache,
        }
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            symbol: "2330".into(),
            today_open: 120.0,
            yesterday_close: 0.0,
            analysis_days: 60,
            force_update: false,
            include_news: true,
            deep_news: false,
            mode: AnalysisMode::Comprehensive,
            params: TradeParams::default(),
        }
    }

    #[tokio::test]
    async fn test_full_pipeline_writes_report_and_csv() {
        let bars = bars_from_closes(&wave(80));
        let last_close = bars.last().unwrap().close;
        let h = harness(
            FakeMarket {
                bars,
                fail_institutional: true,
                ..Default::default()
            },
            Some("tok"),
        )
        .await;

        let outcome = h.service.run(&request()).await.unwrap();

        assert_eq!(outcome.stock.name, "台積電");
        assert_eq!(outcome.yesterday_close, last_close);
        assert!(outcome.institutional.is_empty());
        assert!(outcome.signals.is_some());
        assert!(outcome.stop_plan.is_some());
        assert!(outcome.news.as_ref().is_some_and(|n| !n.is_fallback()));
        assert!(outcome.report_path.starts_with(&h.reports_dir));

        let md = std::fs::read_to_string(&outcome.report_path).unwrap();
        assert!(md.starts_with("# 2330 台積電 當沖分析報告"));
        assert!(md.contains("## 📰 近期新聞事件"));
        assert!(md.contains("📊 完整分析模式（技術面 + 籌碼面 + 新聞面）"));

        let csv = std::fs::read_to_string(&outcome.csv_path).unwrap();
        assert_eq!(csv.lines().count(), 81);

        let stats = h.cache.query_stats(1).await.unwrap();
        assert_eq!(stats[0].symbol, "2330");
    }

    #[tokio::test]
    async fn test_stop_plan_anchors_on_latest_close() {
        let h = harness(
            FakeMarket {
                bars: bars_from_closes(&wave(40)),
                ..Default::default()
            },
            Some("tok"),
        )
        .await;
        let mut req = request();
        req.today_open = 9_999.0;
        req.include_news = false;

        let outcome = h.service.run(&req).await.unwrap();
        let (bar, row) = outcome.frame.latest().unwrap();
        let expected = stop_plan(bar.close, row.atr.unwrap(), RISK_REWARD);
        assert_eq!(outcome.stop_plan, Some(expected));
        assert!(outcome.stop_plan.unwrap().stop_loss < bar.close);
    }

    #[tokio::test]
    async fn test_user_yesterday_close_wins() {
        let h = harness(
            FakeMarket {
                bars: bars_from_closes(&wave(40)),
                ..Default::default()
            },
            Some("tok"),
        )
        .await;
        let mut req = request();
        req.yesterday_close = 118.5;
        req.include_news = false;

        let outcome = h.service.run(&req).await.unwrap();
        assert_eq!(outcome.yesterday_close, 118.5);
        assert!(outcome.news.is_none());
    }

    #[tokio::test]
    async fn test_missing_token_is_validation_error() {
        let h = harness(FakeMarket::default(), None).await;
        let err = h.service.run(&request()).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn test_no_prices_is_fatal() {
        let h = harness(FakeMarket::default(), Some("tok")).await;
        let err = h.service.run(&request()).await.unwrap_err();
        assert!(matches!(err, DomainError::NoData { .. }));
        assert!(!h.reports_dir.exists());
    }
}
