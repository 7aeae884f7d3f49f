//! Core domain layer. No external I/O dependencies.
//!
//! Entities, indicator math and trading rules live here. Dependencies flow inward.

pub mod entities;
pub mod errors;
pub mod indicators;
pub mod levels;
pub mod risk;
pub mod signals;

pub use entities::{
    CacheStats, CachedNews, CleanupCounts, InstitutionalFlow, InstitutionalTotals, MarginBalance,
    MarketBreadth, NewsDigest, NewsOrigin, PriceBar, ProbeReport, QueryStat, StockId,
    normalize_code,
};
pub use errors::DomainError;
pub use indicators::{IndicatorRow, TechnicalFrame, compute_indicators};
pub use levels::{PriceLevel, StopPlan, Strength, SupportResistance, stop_plan, support_resistance};
pub use signals::{DayTradingSignals, Recommendation, SignalSummary, daytrading_signals, signal_summary};
