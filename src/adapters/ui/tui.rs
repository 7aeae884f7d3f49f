//! Implements InputPort. Inquire-based interactive menu.
//!
//! Each menu entry maps onto one use case call; results are printed as text.

use super::progress::with_spinner;
use crate::domain::DomainError;
use crate::domain::risk::format_currency;
use crate::ports::InputPort;
use crate::usecases::cache_service::{DEFAULT_QUERY_STATS_DAYS, DEFAULT_RETENTION_DAYS};
use crate::usecases::{
    AdvisorService, AnalysisMode, AnalysisOutcome, AnalysisRequest, AnalysisService,
    CacheService, MarketDataService, TradeParams,
};
use async_trait::async_trait;
use chrono::Local;
use inquire::error::InquireError;
use inquire::ui::{Color, RenderConfig, StyleSheet, Styled};
use inquire::{Confirm, CustomType, Select, Text};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

/// Prompt theme: neon prefix and answers, applied globally.
pub fn apply_theme() {
    let neon = Color::Rgb {
        r: 0x0f,
        g: 0xf0,
        b: 0xfc,
    };
    let config = RenderConfig::default()
        .with_prompt_prefix(Styled::new("›").with_fg(neon))
        .with_highlighted_option_prefix(Styled::new("▶").with_fg(neon))
        .with_answer(StyleSheet::new().with_fg(neon));
    inquire::set_global_render_config(config);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuAction {
    Analyze,
    ProbeApi,
    Breadth,
    CacheStats,
    QueryStats,
    Cleanup,
    TokenUsage,
    Exit,
}

impl MenuAction {
    const ALL: [MenuAction; 8] = [
        Self::Analyze,
        Self::ProbeApi,
        Self::Breadth,
        Self::CacheStats,
        Self::QueryStats,
        Self::Cleanup,
        Self::TokenUsage,
        Self::Exit,
    ];
}

impl fmt::Display for MenuAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Analyze => "📈 當沖分析",
            Self::ProbeApi => "🔌 測試 FinMind API",
            Self::Breadth => "🌐 大盤漲跌家數",
            Self::CacheStats => "🗄️  快取統計",
            Self::QueryStats => "📊 查詢統計 (最近 30 天)",
            Self::Cleanup => "🧹 清理舊快取",
            Self::TokenUsage => "💰 Token 使用統計",
            Self::Exit => "🚪 離開",
        };
        f.write_str(label)
    }
}

struct ModeChoice(AnalysisMode);

impl fmt::Display for ModeChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hint = match self.0 {
            AnalysisMode::Quick => "數秒內完成",
            AnalysisMode::Comprehensive => "技術 + 籌碼 + 新聞",
            AnalysisMode::Deep => "深度研究，耗時較長",
        };
        write!(f, "{} ({})", self.0.title(), hint)
    }
}

/// What a prompt error means for the menu loop.
enum Interrupt {
    /// ESC: back to the menu.
    Back,
    /// Ctrl-C: leave the app.
    Quit,
    Failed(DomainError),
}

impl From<InquireError> for Interrupt {
    fn from(e: InquireError) -> Self {
        match e {
            InquireError::OperationCanceled => Interrupt::Back,
            InquireError::OperationInterrupted => Interrupt::Quit,
            other => Interrupt::Failed(DomainError::Prompt(other.to_string())),
        }
    }
}

impl From<DomainError> for Interrupt {
    fn from(e: DomainError) -> Self {
        Interrupt::Failed(e)
    }
}

/// Form defaults taken from config.
#[derive(Debug, Clone, Copy)]
pub struct TuiDefaults {
    pub analysis_days: u32,
    pub params: TradeParams,
}

/// TUI adapter. Inquire prompts over the use cases.
pub struct TuiInputPort {
    analysis: Arc<AnalysisService>,
    market: Arc<MarketDataService>,
    cache: Arc<CacheService>,
    advisor: Arc<AdvisorService>,
    defaults: TuiDefaults,
}

impl TuiInputPort {
    pub fn new(
        analysis: Arc<AnalysisService>,
        market: Arc<MarketDataService>,
        cache: Arc<CacheService>,
        advisor: Arc<AdvisorService>,
        defaults: TuiDefaults,
    ) -> Self {
        Self {
            analysis,
            market,
            cache,
            advisor,
            defaults,
        }
    }

    fn analysis_form(&self) -> Result<AnalysisRequest, InquireError> {
        let symbol = Text::new("股票代號:")
            .with_default("2330")
            .with_help_message("例如 2330、2317.TW")
            .prompt()?;
        let today_open = CustomType::<f64>::new("今日開盤價:")
            .with_error_message("請輸入數字")
            .prompt()?;
        let yesterday_close = CustomType::<f64>::new("昨日收盤價:")
            .with_default(0.0)
            .with_help_message("0 = 使用資料中的最新收盤價")
            .prompt()?;
        let analysis_days = CustomType::<u32>::new("分析天數:")
            .with_default(self.defaults.analysis_days)
            .prompt()?;

        let modes = vec![
            ModeChoice(AnalysisMode::Quick),
            ModeChoice(AnalysisMode::Comprehensive),
            ModeChoice(AnalysisMode::Deep),
        ];
        let mode = Select::new("分析模式:", modes)
            .with_starting_cursor(1)
            .prompt()?
            .0;

        let include_news = Confirm::new("搜尋近期新聞?").with_default(true).prompt()?;
        let deep_news = include_news
            && Confirm::new("重大事件時使用深度研究?")
                .with_default(false)
                .prompt()?;
        let force_update = Confirm::new("略過快取重新抓取?")
            .with_default(false)
            .prompt()?;

        Ok(AnalysisRequest {
            symbol,
            today_open,
            yesterday_close,
            analysis_days,
            force_update,
            include_news,
            deep_news,
            mode,
            params: self.defaults.params,
        })
    }

    async fn analyze(&self) -> Result<(), Interrupt> {
        let request = self.analysis_form()?;
        let outcome = with_spinner(
            format!("分析 {} 中...", request.symbol.trim()),
            self.analysis.run(&request),
        )
        .await?;
        print_outcome(&outcome);
        Ok(())
    }

    async fn probe(&self) -> Result<(), Interrupt> {
        let symbol = Text::new("測試股票代號:").with_default("2330").prompt()?;
        let report = with_spinner("連線 FinMind...", self.market.probe(&symbol)).await;
        if report.success {
            println!("✅ {} ({} 筆資料)", report.message, report.data_count);
            if !report.columns.is_empty() {
                println!("   欄位: {}", report.columns.join(", "));
            }
        } else {
            println!("❌ {}", report.message);
        }
        Ok(())
    }

    async fn breadth(&self) -> Result<(), Interrupt> {
        let today = Local::now().date_naive();
        match with_spinner("讀取大盤資料...", self.market.breadth(today)).await? {
            Some(b) => println!(
                "🌐 {}: 上漲 {} | 下跌 {} | 平盤 {} | 合計 {}",
                today, b.up, b.down, b.unchanged, b.total
            ),
            None => println!("⚪ {} 無大盤漲跌資料 (可能為非交易日)", today),
        }
        Ok(())
    }

    async fn cache_stats(&self) -> Result<(), Interrupt> {
        let s = self.cache.stats().await?;
        println!("🗄️  快取統計");
        println!("   股價資料: {} 筆", s.stock_prices);
        println!("   法人資料: {} 筆", s.institutional);
        println!("   有效新聞: {} 筆", s.live_news);
        println!("   查詢記錄: {} 筆", s.query_logs);
        println!("   資料庫大小: {:.2} MB", s.size_mb);
        Ok(())
    }

    async fn query_stats(&self) -> Result<(), Interrupt> {
        let rows = self.cache.query_stats(DEFAULT_QUERY_STATS_DAYS).await?;
        if rows.is_empty() {
            println!("尚無查詢記錄");
        }
        for r in rows {
            println!("   {:<8} {:<10} {} 次", r.symbol, r.query_type, r.count);
        }
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), Interrupt> {
        let days = CustomType::<u32>::new("保留天數:")
            .with_default(DEFAULT_RETENTION_DAYS)
            .prompt()?;
        if !Confirm::new(&format!("刪除 {} 天前的快取資料?", days))
            .with_default(false)
            .prompt()?
        {
            return Ok(());
        }
        let c = self.cache.cleanup(days).await?;
        println!(
            "🧹 已刪除 股價 {} | 法人 {} | 新聞 {} | 查詢記錄 {}",
            c.stock_prices, c.institutional, c.news, c.query_logs
        );
        Ok(())
    }

    fn token_usage(&self) -> Result<(), Interrupt> {
        println!("{}", self.advisor.token_report());
        if Confirm::new("重設統計?").with_default(false).prompt()? {
            self.advisor.reset_token_usage();
        }
        Ok(())
    }
}

fn print_outcome(o: &AnalysisOutcome) {
    println!();
    println!("{}", o.ai_report);
    println!();
    if let Some(s) = &o.signals {
        println!(
            "🎯 {} | 訊號強度 {} | {}",
            s.recommendation.label(),
            s.strength,
            s.signals.join("、")
        );
    }
    if let Some(p) = &o.stop_plan {
        println!(
            "🛡️  停損 {} | 停利 {} | 建議 {} 股",
            format_currency(p.stop_loss),
            format_currency(p.take_profit),
            o.position_size
        );
    }
    println!("📝 報告: {}", o.report_path.display());
    println!("📄 指標: {}", o.csv_path.display());
}

#[async_trait]
impl InputPort for TuiInputPort {
    async fn run(&self) -> Result<(), DomainError> {
        loop {
            let action = match Select::new("選擇功能:", MenuAction::ALL.to_vec()).prompt() {
                Ok(a) => a,
                Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
                    MenuAction::Exit
                }
                Err(e) => return Err(DomainError::Prompt(e.to_string())),
            };
            info!(action = ?action, "menu selection");

            let result = match action {
                MenuAction::Analyze => self.analyze().await,
                MenuAction::ProbeApi => self.probe().await,
                MenuAction::Breadth => self.breadth().await,
                MenuAction::CacheStats => self.cache_stats().await,
                MenuAction::QueryStats => self.query_stats().await,
                MenuAction::Cleanup => self.cleanup().await,
                MenuAction::TokenUsage => self.token_usage(),
                MenuAction::Exit => return Ok(()),
            };

            match result {
                Ok(()) | Err(Interrupt::Back) => {}
                Err(Interrupt::Quit) => return Ok(()),
                Err(Interrupt::Failed(DomainError::Prompt(msg))) => {
                    return Err(DomainError::Prompt(msg));
                }
                Err(Interrupt::Failed(e)) => {
                    error!(error = %e, action = ?action, "action failed");
                    println!("❌ {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menu_ends_with_exit() {
        assert_eq!(MenuAction::ALL.last(), Some(&MenuAction::Exit));
        assert_eq!(MenuAction::ALL[0].to_string(), "📈 當沖分析");
    }

    #[test]
    fn test_prompt_errors_map_to_interrupts() {
        assert!(matches!(
            Interrupt::from(InquireError::OperationCanceled),
            Interrupt::Back
        ));
        assert!(matches!(
            Interrupt::from(InquireError::OperationInterrupted),
            Interrupt::Quit
        ));
        assert!(matches!(
            Interrupt::from(InquireError::NotTTY),
            Interrupt::Failed(DomainError::Prompt(_))
        ));
    }

    #[test]
    fn test_mode_choice_label() {
        assert_eq!(
            ModeChoice(AnalysisMode::Quick).to_string(),
            "⚡ 快速分析 (數秒內完成)"
        );
    }
}
