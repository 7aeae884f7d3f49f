//! Input validation, position sizing and money formatting.

use crate::domain::DomainError;
use chrono::{Days, NaiveDate};

/// Taiwan brokerage commission per side, in percent, before discount.
pub const COMMISSION_RATE_PERCENT: f64 = 0.1425;

const FALLBACK_WINDOW_DAYS: u64 = 30;

/// Check the analysis form before any network call.
pub fn validate_inputs(
    symbol: &str,
    today_open: f64,
    market_token: Option<&str>,
    llm_available: bool,
) -> Result<(), DomainError> {
    if symbol.trim().is_empty() {
        return Err(DomainError::Validation(
            "stock code is required (e.g. 2330, 2317, 0050)".into(),
        ));
    }
    if today_open.is_nan() || today_open <= 0.0 {
        return Err(DomainError::Validation(
            "today's open price must be greater than 0".into(),
        ));
    }
    if market_token.is_none_or(|t| t.trim().is_empty()) {
        return Err(DomainError::Validation(
            "FinMind token missing: set FINMIND_TOKEN (https://finmindtrade.com/)".into(),
        ));
    }
    if !llm_available {
        return Err(DomainError::Validation(
            "Perplexity API key missing: set PERPLEXITY_API_KEY (https://www.perplexity.ai/settings/api)"
                .into(),
        ));
    }
    Ok(())
}

/// Whole shares such that a stop-out loses at most `risk_amount`.
pub fn position_size(entry: f64, stop: f64, risk_amount: f64) -> u64 {
    if entry <= stop {
        return 0;
    }
    let shares = (risk_amount / (entry - stop)).floor();
    if shares.is_finite() && shares > 0.0 {
        shares as u64
    } else {
        0
    }
}

/// `NT$ 1,234.56`; negative amounts keep the sign after the prefix.
pub fn format_currency(amount: f64) -> String {
    let sign = if amount < 0.0 { "-" } else { "" };
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("NT$ {sign}{grouped}.{:02}", cents % 100)
}

/// Round-trip cost in percent: commission on both sides at
/// `fee_discount` tenths of list price, plus the transaction tax.
pub fn round_trip_cost_percent(fee_discount: f64, tax_rate: f64) -> f64 {
    2.0 * COMMISSION_RATE_PERCENT * fee_discount / 10.0 + tax_rate
}

/// Clamp future dates to `today` and order the pair.
pub fn validate_date_range(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = start.min(today);
    let end = end.min(today);
    if start > end { (end, start) } else { (start, end) }
}

/// Like [`validate_date_range`] for `YYYY-MM-DD` text; unparseable input
/// falls back to the last 30 days.
pub fn parse_date_range(start: &str, end: &str, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let parse = |s: &str| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d");
    match (parse(start), parse(end)) {
        (Ok(s), Ok(e)) => validate_date_range(s, e, today),
        _ => {
            let from = today
                .checked_sub_days(Days::new(FALLBACK_WINDOW_DAYS))
                .unwrap_or(today);
            (from, today)
        }
    }
}
