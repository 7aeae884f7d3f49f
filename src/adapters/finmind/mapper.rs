//! Map FinMind JSON rows to domain entities.
//!
//! Price and margin rows are typed; institutional rows arrive in either a
//! long format (one row per investor category) or a wide format (`*_diff`
//! columns) and are handled on `serde_json::Value`.

use crate::domain::{DomainError, InstitutionalFlow, MarginBalance, MarketBreadth, PriceBar};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// `TaiwanStockPrice` row.
#[derive(Debug, Deserialize)]
struct PriceRow {
    date: String,
    open: f64,
    max: f64,
    min: f64,
    close: f64,
    #[serde(rename = "Trading_Volume", default)]
    trading_volume: f64,
    #[serde(rename = "Trading_money")]
    trading_money: Option<f64>,
    spread: Option<f64>,
    #[serde(rename = "Trading_turnover")]
    trading_turnover: Option<f64>,
}

/// `TaiwanStockMarginPurchaseShortSale` row.
#[derive(Debug, Deserialize)]
struct MarginRow {
    date: String,
    #[serde(rename = "MarginPurchaseTodayBalance", default)]
    margin_purchase_balance: f64,
    #[serde(rename = "ShortSaleTodayBalance", default)]
    short_sale_balance: f64,
    #[serde(rename = "MarginPurchaseBuy", default)]
    margin_purchase_buy: f64,
    #[serde(rename = "MarginPurchaseSell", default)]
    margin_purchase_sell: f64,
    #[serde(rename = "ShortSaleBuy", default)]
    short_sale_buy: f64,
    #[serde(rename = "ShortSaleSell", default)]
    short_sale_sell: f64,
}

fn parse_date(s: &str) -> Result<NaiveDate, DomainError> {
    // Some datasets append a time component.
    let day = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|e| DomainError::MarketData(format!("bad date {:?}: {}", s, e)))
}

fn decode<T: for<'de> Deserialize<'de>>(row: &Value) -> Result<T, DomainError> {
    T::deserialize(row).map_err(|e| DomainError::MarketData(format!("unexpected row shape: {}", e)))
}

/// Price rows to bars, ascending by date.
pub fn prices_to_domain(rows: &[Value]) -> Result<Vec<PriceBar>, DomainError> {
    let mut bars = rows
        .iter()
        .map(|row| {
            let r: PriceRow = decode(row)?;
            Ok(PriceBar {
                date: parse_date(&r.date)?,
                open: r.open,
                high: r.max,
                low: r.min,
                close: r.close,
                volume: r.trading_volume,
                amount: r.trading_money,
                change: r.spread,
                turnover: r.trading_turnover,
            })
        })
        .collect::<Result<Vec<_>, DomainError>>()?;
    bars.sort_by_key(|b| b.date);
    Ok(bars)
}

pub fn margin_to_domain(rows: &[Value]) -> Result<Vec<MarginBalance>, DomainError> {
    let mut out = rows
        .iter()
        .map(|row| {
            let r: MarginRow = decode(row)?;
            Ok(MarginBalance {
                date: parse_date(&r.date)?,
                margin_purchase_balance: r.margin_purchase_balance,
                short_sale_balance: r.short_sale_balance,
                margin_purchase_buy: r.margin_purchase_buy,
                margin_purchase_sell: r.margin_purchase_sell,
                short_sale_buy: r.short_sale_buy,
                short_sale_sell: r.short_sale_sell,
            })
        })
        .collect::<Result<Vec<_>, DomainError>>()?;
    out.sort_by_key(|m| m.date);
    Ok(out)
}

/// First breadth row; missing counts are zero.
pub fn breadth_to_domain(rows: &[Value]) -> Option<MarketBreadth> {
    let row = rows.first()?;
    let count = |key: &str| row.get(key).and_then(Value::as_i64).unwrap_or(0);
    let (up, down, unchanged) = (count("up"), count("down"), count("unchanged"));
    Some(MarketBreadth {
        up,
        down,
        unchanged,
        total: up + down + unchanged,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Foreign,
    Trust,
    DealerSelf,
    DealerHedging,
    DealerTotal,
    /// Foreign dealers are reported but not part of the three-party total.
    Ignored,
}

fn category(name: &str) -> Category {
    match name {
        "外資及陸資" | "外資" | "Foreign_Investor" => Category::Foreign,
        "投信" | "Investment_Trust" => Category::Trust,
        "自營商(自行買賣)" | "Dealer_self" | "Dealer_Self" => Category::DealerSelf,
        "自營商(避險)" | "Dealer_Hedging" => Category::DealerHedging,
        "自營商" | "Dealer" => Category::DealerTotal,
        _ => Category::Ignored,
    }
}

#[derive(Debug, Default)]
struct DayAcc {
    foreign: f64,
    trust: f64,
    dealer_self: f64,
    dealer_hedging: f64,
    dealer_total: Option<f64>,
}

impl DayAcc {
    fn add(&mut self, cat: Category, diff: f64) {
        match cat {
            Category::Foreign => self.foreign += diff,
            Category::Trust => self.trust += diff,
            Category::DealerSelf => self.dealer_self += diff,
            Category::DealerHedging => self.dealer_hedging += diff,
            Category::DealerTotal => *self.dealer_total.get_or_insert(0.0) += diff,
            Category::Ignored => {}
        }
    }

    fn finish(self, date: NaiveDate) -> InstitutionalFlow {
        let dealer_total = self
            .dealer_total
            .unwrap_or(self.dealer_self + self.dealer_hedging);
        InstitutionalFlow {
            date,
            foreign_investor: self.foreign,
            investment_trust: self.trust,
            dealer_self: self.dealer_self,
            dealer_hedging: self.dealer_hedging,
            dealer_total,
            total: self.foreign + self.trust + dealer_total,
        }
    }
}

fn number(row: &Value, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

fn is_long_format(rows: &[Value]) -> bool {
    rows.first().is_some_and(|r| {
        r.get("name").is_some()
            && (r.get("diff").is_some() || (r.get("buy").is_some() && r.get("sell").is_some()))
    })
}

/// Institutional rows to one flow per date, newest first.
pub fn institutional_to_domain(rows: &[Value]) -> Result<Vec<InstitutionalFlow>, DomainError> {
    let mut days: BTreeMap<NaiveDate, DayAcc> = BTreeMap::new();
    let long = is_long_format(rows);

    for row in rows {
        let date = row
            .get("date")
            .and_then(Value::as_str)
            .ok_or_else(|| DomainError::MarketData("institutional row without date".into()))
            .and_then(parse_date)?;
        let acc = days.entry(date).or_default();

        if long {
            let name = row.get("name").and_then(Value::as_str).unwrap_or_default();
            let diff = number(row, "diff").unwrap_or_else(|| {
                number(row, "buy").unwrap_or(0.0) - number(row, "sell").unwrap_or(0.0)
            });
            acc.add(category(name), diff);
        } else {
            let col = |k: &str| number(row, k).unwrap_or(0.0);
            acc.add(Category::Foreign, col("Foreign_Investor_diff"));
            acc.add(Category::Trust, col("Investment_Trust_diff"));
            acc.add(Category::DealerSelf, col("Dealer_Self_diff"));
            acc.add(Category::DealerHedging, col("Dealer_Hedging_diff"));
            if let Some(d) = number(row, "Dealer_diff") {
                acc.add(Category::DealerTotal, d);
            }
        }
    }

    Ok(days
        .into_iter()
        .rev()
        .map(|(date, acc)| acc.finish(date))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_prices_renamed_and_sorted() {
        let rows = vec![
            json!({"date": "2024-01-03", "stock_id": "2330", "Trading_Volume": 2000, "Trading_money": 1.2e9,
                   "open": 590.0, "max": 595.0, "min": 585.0, "close": 593.0, "spread": 3.0, "Trading_turnover": 900}),
            json!({"date": "2024-01-02", "stock_id": "2330", "Trading_Volume": 1000,
                   "open": 580.0, "max": 592.0, "min": 578.0, "close": 590.0}),
        ];
        let bars = prices_to_domain(&rows).unwrap();
        assert_eq!(bars[0].date, d("2024-01-02"));
        assert_eq!(bars[0].amount, None);
        assert_eq!(bars[1].high, 595.0);
        assert_eq!(bars[1].low, 585.0);
        assert_eq!(bars[1].volume, 2000.0);
        assert_eq!(bars[1].change, Some(3.0));
    }

    #[test]
    fn test_institutional_long_format_buy_sell() {
        let rows = vec![
            json!({"date": "2024-01-02", "name": "Foreign_Investor", "buy": 5000, "sell": 3000}),
            json!({"date": "2024-01-02", "name": "Investment_Trust", "buy": 100, "sell": 400}),
            json!({"date": "2024-01-02", "name": "Dealer_self", "buy": 50, "sell": 0}),
            json!({"date": "2024-01-02", "name": "Dealer_Hedging", "buy": 0, "sell": 20}),
            json!({"date": "2024-01-02", "name": "Foreign_Dealer_Self", "buy": 999, "sell": 0}),
            json!({"date": "2024-01-03", "name": "Foreign_Investor", "buy": 0, "sell": 700}),
        ];
        let flows = institutional_to_domain(&rows).unwrap();
        assert_eq!(flows.len(), 2);
        assert_eq!(flows[0].date, d("2024-01-03"));
        assert_eq!(flows[0].foreign_investor, -700.0);
        assert_eq!(flows[0].total, -700.0);

        let day = &flows[1];
        assert_eq!(day.foreign_investor, 2000.0);
        assert_eq!(day.investment_trust, -300.0);
        assert_eq!(day.dealer_total, 30.0);
        assert_eq!(day.total, 1730.0);
    }

    #[test]
    fn test_institutional_long_format_chinese_diff() {
        let rows = vec![
            json!({"date": "2024-01-02", "name": "外資及陸資", "diff": 1200}),
            json!({"date": "2024-01-02", "name": "投信", "diff": -200}),
            json!({"date": "2024-01-02", "name": "自營商", "diff": 75}),
            json!({"date": "2024-01-02", "name": "自營商(自行買賣)", "diff": 50}),
        ];
        let flows = institutional_to_domain(&rows).unwrap();
        assert_eq!(flows[0].dealer_total, 75.0);
        assert_eq!(flows[0].dealer_self, 50.0);
        assert_eq!(flows[0].total, 1075.0);
    }

    #[test]
    fn test_institutional_wide_format() {
        let rows = vec![json!({
            "date": "2024-01-02",
            "Foreign_Investor_diff": 300,
            "Investment_Trust_diff": "1,000",
            "Dealer_Self_diff": 10,
        })];
        let flows = institutional_to_domain(&rows).unwrap();
        assert_eq!(flows[0].investment_trust, 1000.0);
        assert_eq!(flows[0].dealer_hedging, 0.0);
        assert_eq!(flows[0].dealer_total, 10.0);
        assert_eq!(flows[0].total, 1310.0);
    }

    #[test]
    fn test_breadth_totals() {
        let rows = vec![json!({"date": "2024-01-02", "up": 500, "down": 300})];
        let b = breadth_to_domain(&rows).unwrap();
        assert_eq!(b.unchanged, 0);
        assert_eq!(b.total, 800);
        assert!(breadth_to_domain(&[]).is_none());
    }
}
