//! Rule-based day-trading signals and crossover history.

use crate::domain::indicators::{IndicatorRow, TechnicalFrame};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl Recommendation {
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s >= 30 => Self::StrongBuy,
            s if s >= 15 => Self::Buy,
            s if s <= -30 => Self::StrongSell,
            s if s <= -15 => Self::Sell,
            _ => Self::Hold,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::StrongBuy => "強力買進",
            Self::Buy => "買進",
            Self::Hold => "觀望",
            Self::Sell => "賣出",
            Self::StrongSell => "強力賣出",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::StrongBuy => "STRONG_BUY",
            Self::Buy => "BUY",
            Self::Hold => "HOLD",
            Self::Sell => "SELL",
            Self::StrongSell => "STRONG_SELL",
        };
        f.write_str(code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayTradingSignals {
    pub date: NaiveDate,
    pub price: f64,
    pub signals: Vec<String>,
    /// Clamped to -100..=100.
    pub strength: i32,
    pub recommendation: Recommendation,
}

fn gt(a: Option<f64>, b: Option<f64>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a > b)
}

fn lt(a: Option<f64>, b: Option<f64>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a < b)
}

fn ge(a: Option<f64>, b: Option<f64>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a >= b)
}

fn le(a: Option<f64>, b: Option<f64>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a <= b)
}

/// Score the latest two rows. `None` with fewer than two bars.
pub fn daytrading_signals(frame: &TechnicalFrame) -> Option<DayTradingSignals> {
    if frame.len() < 2 {
        return None;
    }
    let (bar, last) = frame.from_end(0)?;
    let (_, prev) = frame.from_end(1)?;
    let mut signals = Vec::new();
    let mut score = 0i32;
    let mut hit = |label: &str, delta: i32| {
        signals.push(label.to_string());
        score += delta;
    };

    if gt(last.macd, last.macd_signal) && le(prev.macd, prev.macd_signal) {
        hit("MACD 金叉 (買進)", 15);
    } else if lt(last.macd, last.macd_signal) && ge(prev.macd, prev.macd_signal) {
        hit("MACD 死叉 (賣出)", -15);
    }

    if gt(last.kd_k, last.kd_d) && le(prev.kd_k, prev.kd_d) {
        if lt(last.kd_k, Some(30.0)) {
            hit("KD 低檔金叉 (強買)", 20);
        } else {
            hit("KD 金叉 (買進)", 10);
        }
    } else if lt(last.kd_k, last.kd_d) && ge(prev.kd_k, prev.kd_d) {
        if gt(last.kd_k, Some(70.0)) {
            hit("KD 高檔死叉 (強賣)", -20);
        } else {
            hit("KD 死叉 (賣出)", -10);
        }
    }

    if lt(last.rsi, Some(30.0)) {
        hit("RSI 超賣 (買進)", 15);
    } else if gt(last.rsi, Some(70.0)) {
        hit("RSI 超買 (賣出)", -15);
    }

    if gt(last.williams_r, Some(-20.0)) {
        hit("Williams %R 超買 (賣出)", -10);
    } else if lt(last.williams_r, Some(-80.0)) {
        hit("Williams %R 超賣 (買進)", 10);
    }

    if gt(last.adx, Some(25.0)) {
        if gt(last.di_plus, last.di_minus) {
            hit("ADX 強勢上漲趨勢", 10);
        } else {
            hit("ADX 強勢下跌趨勢", -10);
        }
    }

    if gt(last.cci, Some(100.0)) {
        hit("CCI 超買 (賣出)", -10);
    } else if lt(last.cci, Some(-100.0)) {
        hit("CCI 超賣 (買進)", 10);
    }

    if let Some((base_bar, base_row)) = frame.from_end(4) {
        let price_up = bar.close > base_bar.close;
        let obv_up = gt(last.obv, base_row.obv);
        if price_up && !obv_up {
            hit("OBV 頂背離 (賣出)", -15);
        } else if !price_up && obv_up {
            hit("OBV 底背離 (買進)", 15);
        }
    }

    let close = Some(bar.close);
    if gt(close, last.bb_upper) {
        hit("突破布林上軌 (強勢/超買)", 5);
    } else if lt(close, last.bb_lower) {
        hit("跌破布林下軌 (弱勢/超賣)", -5);
    }

    if gt(last.volume_ratio, Some(150.0)) {
        hit("成交量爆量 (注意)", 5);
    }

    if gt(last.roc_5, Some(5.0)) {
        hit("短期動能強勁", 10);
    } else if lt(last.roc_5, Some(-5.0)) {
        hit("短期動能疲弱", -10);
    }

    Some(DayTradingSignals {
        date: bar.date,
        price: bar.close,
        signals,
        strength: score.clamp(-100, 100),
        recommendation: Recommendation::from_score(score),
    })
}

/// A crossover event: date and the value plotted at that point.
pub type Crossover = (NaiveDate, f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Divergence {
    Bearish,
    Bullish,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SignalSummary {
    pub ma_golden_cross: Vec<Crossover>,
    pub ma_death_cross: Vec<Crossover>,
    pub kd_golden_cross: Vec<Crossover>,
    pub kd_death_cross: Vec<Crossover>,
    pub macd_golden_cross: Vec<Crossover>,
    pub macd_death_cross: Vec<Crossover>,
    pub rsi_overbought: bool,
    pub rsi_oversold: bool,
    pub kd_overbought: bool,
    pub kd_oversold: bool,
    pub williams_overbought: bool,
    pub williams_oversold: bool,
    pub cci_overbought: bool,
    pub cci_oversold: bool,
    pub adx_strong_trend: bool,
    pub obv_divergence: Option<Divergence>,
}

type Pick = fn(&IndicatorRow) -> Option<f64>;

/// Golden and death crosses of `fast` over `slow` across the frame.
fn crossovers(
    frame: &TechnicalFrame,
    fast: Pick,
    slow: Pick,
    value: impl Fn(usize) -> Option<f64>,
) -> (Vec<Crossover>, Vec<Crossover>) {
    let mut golden = Vec::new();
    let mut death = Vec::new();
    for i in 1..frame.len() {
        let (p, c) = (&frame.rows[i - 1], &frame.rows[i]);
        let date = frame.bars[i].date;
        if le(fast(p), slow(p)) && gt(fast(c), slow(c)) {
            golden.extend(value(i).map(|v| (date, v)));
        }
        if ge(fast(p), slow(p)) && lt(fast(c), slow(c)) {
            death.extend(value(i).map(|v| (date, v)));
        }
    }
    (golden, death)
}

pub fn signal_summary(frame: &TechnicalFrame) -> SignalSummary {
    let close_at = |i: usize| Some(frame.bars[i].close);
    let (ma_golden_cross, ma_death_cross) = crossovers(frame, |r| r.ma5, |r| r.ma20, close_at);
    let (kd_golden_cross, kd_death_cross) =
        crossovers(frame, |r| r.kd_k, |r| r.kd_d, |i| frame.rows[i].kd_k);
    let (macd_golden_cross, macd_death_cross) =
        crossovers(frame, |r| r.macd, |r| r.macd_signal, |i| frame.rows[i].macd);

    let mut summary = SignalSummary {
        ma_golden_cross,
        ma_death_cross,
        kd_golden_cross,
        kd_death_cross,
        macd_golden_cross,
        macd_death_cross,
        ..SignalSummary::default()
    };

    let Some((_, last)) = frame.latest() else {
        return summary;
    };
    summary.rsi_overbought = gt(last.rsi, Some(70.0));
    summary.rsi_oversold = lt(last.rsi, Some(30.0));
    summary.kd_overbought = gt(last.kd_k, Some(80.0));
    summary.kd_oversold = lt(last.kd_k, Some(20.0));
    summary.williams_overbought = gt(last.williams_r, Some(-20.0));
    summary.williams_oversold = lt(last.williams_r, Some(-80.0));
    summary.cci_overbought = gt(last.cci, Some(100.0));
    summary.cci_oversold = lt(last.cci, Some(-100.0));
    summary.adx_strong_trend = gt(last.adx, Some(25.0));

    if let (Some((first_bar, first_row)), Some((last_bar, _))) = (frame.from_end(9), frame.latest()) {
        let price_up = last_bar.close > first_bar.close;
        let obv_up = gt(last.obv, first_row.obv);
        summary.obv_divergence = match (price_up, obv_up) {
            (true, false) => Some(Divergence::Bearish),
            (false, true) => Some(Divergence::Bullish),
            _ => None,
        };
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicators::compute_indicators;
    use crate::domain::indicators::test_support::{bars_from_closes, wave};

    fn two_row_frame(prev: IndicatorRow, last: IndicatorRow) -> TechnicalFrame {
        TechnicalFrame {
            bars: bars_from_closes(&[100.0, 100.0]),
            rows: vec![prev, last],
        }
    }

    #[test]
    fn test_recommendation_thresholds() {
        assert_eq!(Recommendation::from_score(30), Recommendation::StrongBuy);
        assert_eq!(Recommendation::from_score(15), Recommendation::Buy);
        assert_eq!(Recommendation::from_score(14), Recommendation::Hold);
        assert_eq!(Recommendation::from_score(-15), Recommendation::Sell);
        assert_eq!(Recommendation::from_score(-45), Recommendation::StrongSell);
        assert_eq!(Recommendation::StrongSell.to_string(), "STRONG_SELL");
    }

    #[test]
    fn test_needs_two_bars() {
        let frame = compute_indicators(bars_from_closes(&[10.0]));
        assert!(daytrading_signals(&frame).is_none());
    }

    #[test]
    fn test_low_kd_golden_cross_with_oversold_rsi() {
        let prev = IndicatorRow {
            kd_k: Some(18.0),
            kd_d: Some(20.0),
            ..Default::default()
        };
        let last = IndicatorRow {
            kd_k: Some(25.0),
            kd_d: Some(22.0),
            rsi: Some(25.0),
            williams_r: Some(-90.0),
            ..Default::default()
        };
        let s = daytrading_signals(&two_row_frame(prev, last)).unwrap();
        assert_eq!(s.strength, 45);
        assert_eq!(s.recommendation, Recommendation::StrongBuy);
        assert_eq!(s.signals.len(), 3);
        assert!(s.signals[0].contains("KD 低檔金叉"));
    }

    #[test]
    fn test_missing_values_never_fire() {
        let s = daytrading_signals(&two_row_frame(IndicatorRow::default(), IndicatorRow::default()))
            .unwrap();
        assert!(s.signals.is_empty());
        assert_eq!(s.strength, 0);
        assert_eq!(s.recommendation, Recommendation::Hold);
    }

    #[test]
    fn test_macd_death_cross_and_adx_downtrend() {
        let prev = IndicatorRow {
            macd: Some(1.0),
            macd_signal: Some(0.5),
            ..Default::default()
        };
        let last = IndicatorRow {
            macd: Some(0.2),
            macd_signal: Some(0.4),
            adx: Some(30.0),
            di_plus: Some(10.0),
            di_minus: Some(25.0),
            cci: Some(150.0),
            ..Default::default()
        };
        let s = daytrading_signals(&two_row_frame(prev, last)).unwrap();
        assert_eq!(s.strength, -35);
        assert_eq!(s.recommendation, Recommendation::StrongSell);
    }

    #[test]
    fn test_summary_on_rising_series() {
        let closes: Vec<f64> = (0..40).map(|i| 50.0 + i as f64).collect();
        let summary = signal_summary(&compute_indicators(bars_from_closes(&closes)));
        assert!(summary.rsi_overbought);
        assert!(!summary.rsi_oversold);
        assert!(summary.williams_overbought);
        assert!(summary.ma_death_cross.is_empty());
        assert_eq!(summary.obv_divergence, None);
    }

    #[test]
    fn test_summary_detects_ma_crosses() {
        let mut closes = wave(30);
        closes.extend((0..15).map(|i| 90.0 - i as f64 * 2.0));
        let summary = signal_summary(&compute_indicators(bars_from_closes(&closes)));
        assert!(!summary.ma_death_cross.is_empty());
    }
}
