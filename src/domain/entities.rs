//! Domain entities. Pure data structures for the core business.
//!
//! No FinMind/HTTP types here; adapters map wire rows into these.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Common Taiwan tickers and their display names.
const STOCK_NAMES: &[(&str, &str)] = &[
    ("2330", "台積電"),
    ("2317", "鴻海"),
    ("2454", "聯發科"),
    ("2412", "中華電"),
    ("2882", "國泰金"),
    ("2881", "富邦金"),
    ("2886", "兆豐金"),
    ("2891", "中信金"),
    ("2892", "第一金"),
    ("2884", "玉山金"),
    ("2885", "元大金"),
    ("2002", "中鋼"),
    ("1301", "台塑"),
    ("1303", "南亞"),
    ("1326", "台化"),
    ("2308", "台達電"),
    ("2382", "廣達"),
    ("2357", "華碩"),
    ("3008", "大立光"),
    ("2303", "聯電"),
    ("2379", "瑞昱"),
    ("3711", "日月光投控"),
    ("2327", "國巨"),
    ("6505", "台塑化"),
    ("5880", "合庫金"),
    ("0050", "元大台灣50"),
    ("0056", "元大高股息"),
    ("006208", "富邦台50"),
    ("00878", "國泰永續高股息"),
    ("00679B", "元大美債20年"),
];

/// A listed security: normalized code plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockId {
    pub code: String,
    pub name: String,
}

impl StockId {
    /// Normalize user input (`2330`, `2330.tw`, ` 0050.TWO `) into a bare code
    /// and look up its display name. Unknown codes use the code as name.
    pub fn parse(input: &str) -> Self {
        let code = normalize_code(input);
        let name = STOCK_NAMES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, n)| n.to_string())
            .unwrap_or_else(|| code.clone());
        Self { code, name }
    }

    pub fn has_known_name(&self) -> bool {
        self.name != self.code
    }
}

impl fmt::Display for StockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_known_name() {
            write!(f, "{} {}", self.code, self.name)
        } else {
            write!(f, "{}", self.code)
        }
    }
}

/// Strip exchange suffixes and whitespace, upper-case the rest.
pub fn normalize_code(input: &str) -> String {
    let upper = input.trim().to_uppercase();
    let code = upper
        .strip_suffix(".TWO")
        .or_else(|| upper.strip_suffix(".TW"))
        .unwrap_or(&upper);
    code.trim().to_string()
}

/// One daily OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub amount: Option<f64>,
    pub change: Option<f64>,
    pub turnover: Option<f64>,
}

/// Net buy/sell of the three institutional investor groups for one day.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstitutionalFlow {
    pub date: NaiveDate,
    pub foreign_investor: f64,
    pub investment_trust: f64,
    pub dealer_self: f64,
    pub dealer_hedging: f64,
    pub dealer_total: f64,
    pub total: f64,
}

/// Sums over a window of institutional flows.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct InstitutionalTotals {
    pub days: usize,
    pub foreign_investor: f64,
    pub investment_trust: f64,
    pub dealer_total: f64,
    pub total: f64,
}

impl InstitutionalTotals {
    /// Sum the first `days` flows (flows are newest first).
    pub fn from_recent(flows: &[InstitutionalFlow], days: usize) -> Self {
        flows.iter().take(days).fold(
            Self {
                days: flows.len().min(days),
                ..Self::default()
            },
            |acc, f| Self {
                days: acc.days,
                foreign_investor: acc.foreign_investor + f.foreign_investor,
                investment_trust: acc.investment_trust + f.investment_trust,
                dealer_total: acc.dealer_total + f.dealer_total,
                total: acc.total + f.total,
            },
        )
    }
}

/// Advancers / decliners for the whole market on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketBreadth {
    pub up: i64,
    pub down: i64,
    pub unchanged: i64,
    pub total: i64,
}

/// Margin purchase / short sale balances for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginBalance {
    pub date: NaiveDate,
    pub margin_purchase_balance: f64,
    pub short_sale_balance: f64,
    pub margin_purchase_buy: f64,
    pub margin_purchase_sell: f64,
    pub short_sale_buy: f64,
    pub short_sale_sell: f64,
}

/// Outcome of a FinMind connectivity probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub success: bool,
    pub message: String,
    pub data_count: usize,
    pub columns: Vec<String>,
}

/// Where a news digest came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewsOrigin {
    Cache,
    Api,
    Fallback,
}

/// Summarized recent news for one stock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsDigest {
    pub content: String,
    pub origin: NewsOrigin,
    pub model: String,
    pub has_important_event: bool,
    /// Unix seconds; `None` for cache hits and fallbacks.
    pub fetched_at: Option<i64>,
}

impl NewsDigest {
    pub fn is_fallback(&self) -> bool {
        self.origin == NewsOrigin::Fallback
    }
}

/// Cached news entry as stored by the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedNews {
    pub content: String,
    pub source: String,
    pub created_at: i64,
}

/// Count of logged queries per (symbol, type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryStat {
    pub symbol: String,
    pub query_type: String,
    pub count: i64,
}

/// Row counts and size of the cache database.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheStats {
    pub stock_prices: i64,
    pub institutional: i64,
    pub live_news: i64,
    pub query_logs: i64,
    pub size_mb: f64,
}

/// Rows deleted by a cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupCounts {
    pub stock_prices: u64,
    pub institutional: u64,
    pub news: u64,
    pub query_logs: u64,
}
