//! Support / resistance levels and ATR-based stop plans.

use crate::domain::indicators::TechnicalFrame;
use serde::Serialize;

/// Levels closer than this fraction to the previously kept one are dropped.
const MERGE_TOLERANCE: f64 = 0.005;
const SWING_LOOKBACK: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strength {
    Strong,
    Medium,
}

impl Strength {
    pub fn label(&self) -> &'static str {
        match self {
            Strength::Strong => "強",
            Strength::Medium => "中",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceLevel {
    pub price: f64,
    pub label: String,
    pub strength: Strength,
}

impl PriceLevel {
    fn new(price: f64, label: impl Into<String>, strength: Strength) -> Self {
        Self {
            price,
            label: label.into(),
            strength,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SupportResistance {
    /// Highest first.
    pub support: Vec<PriceLevel>,
    /// Lowest first.
    pub resistance: Vec<PriceLevel>,
    pub current_price: f64,
}

/// Collect candidate levels around the latest close.
pub fn support_resistance(frame: &TechnicalFrame, num_levels: usize) -> SupportResistance {
    let Some((bar, row)) = frame.latest() else {
        return SupportResistance::default();
    };
    let price = bar.close;
    let mut support = Vec::new();
    let mut resistance = Vec::new();

    for (name, value) in [
        ("MA5", row.ma5),
        ("MA10", row.ma10),
        ("MA20", row.ma20),
        ("MA60", row.ma60),
    ] {
        match value.filter(|v| *v > 0.0) {
            Some(v) if v < price => support.push(PriceLevel::new(v, format!("{name} 支撐"), Strength::Medium)),
            Some(v) if v > price => {
                resistance.push(PriceLevel::new(v, format!("{name} 壓力"), Strength::Medium))
            }
            _ => {}
        }
    }

    if let Some(upper) = row.bb_upper.filter(|u| *u > price) {
        resistance.push(PriceLevel::new(upper, "布林上軌壓力", Strength::Strong));
    }
    if let Some(lower) = row.bb_lower.filter(|l| *l < price) {
        support.push(PriceLevel::new(lower, "布林下軌支撐", Strength::Strong));
    }

    if let Some(sar) = row.sar.filter(|s| *s > 0.0) {
        if sar < price {
            support.push(PriceLevel::new(sar, "SAR 追蹤止損", Strength::Strong));
        } else {
            resistance.push(PriceLevel::new(sar, "SAR 壓力", Strength::Strong));
        }
    }

    if let Some(vwap) = row.vwap.filter(|v| *v > 0.0) {
        if vwap < price {
            support.push(PriceLevel::new(vwap, "VWAP 平均成本支撐", Strength::Strong));
        } else {
            resistance.push(PriceLevel::new(vwap, "VWAP 平均成本壓力", Strength::Strong));
        }
    }

    let recent = &frame.bars[frame.len().saturating_sub(SWING_LOOKBACK)..];
    for w in recent.windows(3) {
        let (prev, mid, next) = (&w[0], &w[1], &w[2]);
        if mid.high > prev.high && mid.high > next.high && mid.high > price {
            resistance.push(PriceLevel::new(
                mid.high,
                format!("近期高點 ({})", mid.date.format("%m/%d")),
                Strength::Medium,
            ));
        }
        if mid.low < prev.low && mid.low < next.low && mid.low < price {
            support.push(PriceLevel::new(
                mid.low,
                format!("近期低點 ({})", mid.date.format("%m/%d")),
                Strength::Medium,
            ));
        }
    }

    if let Some(atr) = row.atr.filter(|a| *a > 0.0) {
        support.push(PriceLevel::new(price - 2.0 * atr, "ATR 2倍止損點", Strength::Strong));
        resistance.push(PriceLevel::new(price + 2.0 * atr, "ATR 2倍目標價", Strength::Medium));
    }

    support.sort_by(|a, b| b.price.total_cmp(&a.price));
    resistance.sort_by(|a, b| a.price.total_cmp(&b.price));

    let mut support = merge_close(support);
    let mut resistance = merge_close(resistance);
    support.truncate(num_levels);
    resistance.truncate(num_levels);

    SupportResistance {
        support,
        resistance,
        current_price: price,
    }
}

fn merge_close(levels: Vec<PriceLevel>) -> Vec<PriceLevel> {
    let mut kept: Vec<PriceLevel> = Vec::with_capacity(levels.len());
    for level in levels {
        match kept.last() {
            Some(last) if ((level.price - last.price) / last.price).abs() <= MERGE_TOLERANCE => {}
            _ => kept.push(level),
        }
    }
    kept
}

/// ATR-based exit plan for a long entry at `price`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StopPlan {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub conservative_stop: f64,
    pub aggressive_stop: f64,
    pub risk_amount: f64,
    pub reward_amount: f64,
    pub risk_reward_ratio: f64,
}

pub fn stop_plan(price: f64, atr: f64, risk_reward_ratio: f64) -> StopPlan {
    let stop_loss = price - atr * 2.0;
    let take_profit = price + atr * 2.0 * risk_reward_ratio;
    StopPlan {
        stop_loss: round2(stop_loss),
        take_profit: round2(take_profit),
        conservative_stop: round2(price - atr * 1.5),
        aggressive_stop: round2(price - atr * 2.5),
        risk_amount: round2(price - stop_loss),
        reward_amount: round2(take_profit - price),
        risk_reward_ratio,
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
