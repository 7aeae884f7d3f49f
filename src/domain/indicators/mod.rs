//! Technical indicators over daily bars.
//!
//! `compute_indicators` produces one `IndicatorRow` per bar. Values are
//! `None` while an indicator warms up or when it is undefined (e.g. a flat
//! high/low range).

pub mod series;

use crate::domain::PriceBar;
use serde::Serialize;
use series::{
    Series, diff, ema, ewm, present, ratio, rolling_mad, rolling_max, rolling_mean, rolling_min,
    rolling_std, true_range_seeded, zip_with,
};

const SAR_STEP: f64 = 0.02;
const SAR_MAX_STEP: f64 = 0.2;

/// Indicator values for one bar.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorRow {
    pub ma5: Option<f64>,
    pub ma10: Option<f64>,
    pub ma20: Option<f64>,
    pub ma60: Option<f64>,
    pub ema12: Option<f64>,
    pub ema26: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_width: Option<f64>,
    pub bb_pband: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub rsi: Option<f64>,
    pub rsi_6: Option<f64>,
    pub rsi_24: Option<f64>,
    pub kd_k: Option<f64>,
    pub kd_d: Option<f64>,
    pub williams_r: Option<f64>,
    pub atr: Option<f64>,
    pub atr_percent: Option<f64>,
    pub obv: Option<f64>,
    pub obv_ma5: Option<f64>,
    pub adx: Option<f64>,
    pub di_plus: Option<f64>,
    pub di_minus: Option<f64>,
    pub cci: Option<f64>,
    pub vwap: Option<f64>,
    pub bias_5: Option<f64>,
    pub bias_10: Option<f64>,
    pub bias_20: Option<f64>,
    pub sar: Option<f64>,
    pub sar_up: Option<f64>,
    pub sar_down: Option<f64>,
    pub volume_ma5: Option<f64>,
    pub volume_ma20: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub roc_5: Option<f64>,
    pub roc_10: Option<f64>,
    pub true_range: Option<f64>,
    pub tr_percent: Option<f64>,
}

impl IndicatorRow {
    /// Column names and values in export order.
    pub fn columns(&self) -> [(&'static str, Option<f64>); 42] {
        [
            ("MA5", self.ma5),
            ("MA10", self.ma10),
            ("MA20", self.ma20),
            ("MA60", self.ma60),
            ("EMA12", self.ema12),
            ("EMA26", self.ema26),
            ("BB_upper", self.bb_upper),
            ("BB_middle", self.bb_middle),
            ("BB_lower", self.bb_lower),
            ("BB_width", self.bb_width),
            ("BB_pband", self.bb_pband),
            ("MACD", self.macd),
            ("MACD_signal", self.macd_signal),
            ("MACD_hist", self.macd_hist),
            ("RSI", self.rsi),
            ("RSI_6", self.rsi_6),
            ("RSI_24", self.rsi_24),
            ("KD_K", self.kd_k),
            ("KD_D", self.kd_d),
            ("Williams_R", self.williams_r),
            ("ATR", self.atr),
            ("ATR_percent", self.atr_percent),
            ("OBV", self.obv),
            ("OBV_MA5", self.obv_ma5),
            ("ADX", self.adx),
            ("DI_plus", self.di_plus),
            ("DI_minus", self.di_minus),
            ("CCI", self.cci),
            ("VWAP", self.vwap),
            ("BIAS_5", self.bias_5),
            ("BIAS_10", self.bias_10),
            ("BIAS_20", self.bias_20),
            ("SAR", self.sar),
            ("SAR_up", self.sar_up),
            ("SAR_down", self.sar_down),
            ("Volume_MA5", self.volume_ma5),
            ("Volume_MA20", self.volume_ma20),
            ("Volume_Ratio", self.volume_ratio),
            ("ROC_5", self.roc_5),
            ("ROC_10", self.roc_10),
            ("True_Range", self.true_range),
            ("TR_percent", self.tr_percent),
        ]
    }
}

/// Bars plus their indicator rows (same length, ascending by date).
#[derive(Debug, Clone, Default)]
pub struct TechnicalFrame {
    pub bars: Vec<PriceBar>,
    pub rows: Vec<IndicatorRow>,
}

impl TechnicalFrame {
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn latest(&self) -> Option<(&PriceBar, &IndicatorRow)> {
        self.bars.last().zip(self.rows.last())
    }

    /// Bar and row `back` positions before the latest (0 = latest).
    pub fn from_end(&self, back: usize) -> Option<(&PriceBar, &IndicatorRow)> {
        let idx = self.len().checked_sub(back + 1)?;
        Some((&self.bars[idx], &self.rows[idx]))
    }

    pub fn mean_volume(&self) -> f64 {
        if self.bars.is_empty() {
            return 0.0;
        }
        self.bars.iter().map(|b| b.volume).sum::<f64>() / self.bars.len() as f64
    }
}

/// Compute every indicator for `bars` (must be sorted ascending by date).
pub fn compute_indicators(bars: Vec<PriceBar>) -> TechnicalFrame {
    let n = bars.len();
    let close: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let high: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let low: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let volume: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let close_s = present(&close);
    let volume_s = present(&volume);

    let ma5 = rolling_mean(&close_s, 5);
    let ma10 = rolling_mean(&close_s, 10);
    let ma20 = rolling_mean(&close_s, 20);
    let ma60 = rolling_mean(&close_s, 60);
    let ema12 = ema(&close_s, 12);
    let ema26 = ema(&close_s, 26);

    let bb = bollinger(&close_s, 20, 2.0);
    let (macd, macd_signal, macd_hist) = macd(&ema12, &ema26, 9);
    let rsi14 = rsi(&close, 14);
    let rsi6 = rsi(&close, 6);
    let rsi24 = rsi(&close, 24);
    let (kd_k, kd_d) = stochastic(&high, &low, &close, 14, 3);
    let williams = williams_r(&high, &low, &close, 14);
    let atr14 = atr(&high, &low, &close, 14);
    let atr_pct: Series = zip_with(&atr14, &close_s, |a, c| a / c * 100.0);
    let obv_s = obv(&close, &volume);
    let obv_ma5 = rolling_mean(&obv_s, 5);
    let dmi = directional_movement(&high, &low, &close, 14);
    let cci20 = cci(&high, &low, &close, 20);
    let vwap_s = vwap(&bars);
    let bias = |ma: &Series| zip_with(&close_s, ma, |c, m| (c - m) / m * 100.0);
    let sar = parabolic_sar(&high, &low, &close, SAR_STEP, SAR_MAX_STEP);
    let vol_ma5 = rolling_mean(&volume_s, 5);
    let vol_ma20 = rolling_mean(&volume_s, 20);
    let vol_ratio = zip_with(&volume_s, &vol_ma20, |v, m| v / m * 100.0);
    let roc = |lag: usize| -> Series {
        (0..n)
            .map(|i| {
                (i >= lag)
                    .then(|| ratio(Some(close[i] - close[i - lag]), Some(close[i - lag])))
                    .flatten()
                    .map(|r| r * 100.0)
            })
            .collect()
    };
    let roc5 = roc(5);
    let roc10 = roc(10);
    let tr: Series = (0..n)
        .map(|i| {
            (i > 0).then(|| {
                let pc = close[i - 1];
                (high[i] - low[i])
                    .max((high[i] - pc).abs())
                    .max((low[i] - pc).abs())
            })
        })
        .collect();
    let tr_pct = zip_with(&tr, &close_s, |t, c| t / c * 100.0);
    let bias5 = bias(&ma5);
    let bias10 = bias(&ma10);
    let bias20 = bias(&ma20);

    let rows = (0..n)
        .map(|i| IndicatorRow {
            ma5: ma5[i],
            ma10: ma10[i],
            ma20: ma20[i],
            ma60: ma60[i],
            ema12: ema12[i],
            ema26: ema26[i],
            bb_upper: bb.upper[i],
            bb_middle: bb.middle[i],
            bb_lower: bb.lower[i],
            bb_width: bb.width[i],
            bb_pband: bb.pband[i],
            macd: macd[i],
            macd_signal: macd_signal[i],
            macd_hist: macd_hist[i],
            rsi: rsi14[i],
            rsi_6: rsi6[i],
            rsi_24: rsi24[i],
            kd_k: kd_k[i],
            kd_d: kd_d[i],
            williams_r: williams[i],
            atr: atr14[i],
            atr_percent: atr_pct[i],
            obv: obv_s[i],
            obv_ma5: obv_ma5[i],
            adx: dmi.adx[i],
            di_plus: dmi.di_plus[i],
            di_minus: dmi.di_minus[i],
            cci: cci20[i],
            vwap: vwap_s[i],
            bias_5: bias5[i],
            bias_10: bias10[i],
            bias_20: bias20[i],
            sar: sar.sar[i],
            sar_up: sar.up[i],
            sar_down: sar.down[i],
            volume_ma5: vol_ma5[i],
            volume_ma20: vol_ma20[i],
            volume_ratio: vol_ratio[i],
            roc_5: roc5[i],
            roc_10: roc10[i],
            true_range: tr[i],
            tr_percent: tr_pct[i],
        })
        .collect();

    TechnicalFrame { bars, rows }
}

struct Bands {
    upper: Series,
    middle: Series,
    lower: Series,
    width: Series,
    pband: Series,
}

fn bollinger(close: &[Option<f64>], n: usize, k: f64) -> Bands {
    let middle = rolling_mean(close, n);
    let std = rolling_std(close, n);
    let upper = zip_with(&middle, &std, |m, s| m + k * s);
    let lower = zip_with(&middle, &std, |m, s| m - k * s);
    let span = zip_with(&upper, &lower, |u, l| u - l);
    let width = zip_with(&span, &middle, |s, m| s / m * 100.0);
    let pband = (0..close.len())
        .map(|i| {
            let above = zip_with(&[close[i]], &[lower[i]], |c, l| c - l)[0];
            ratio(above, span[i])
        })
        .collect();
    Bands {
        upper,
        middle,
        lower,
        width,
        pband,
    }
}

fn macd(fast: &[Option<f64>], slow: &[Option<f64>], signal_span: usize) -> (Series, Series, Series) {
    let line = zip_with(fast, slow, |f, s| f - s);
    let signal = ema(&line, signal_span);
    let hist = zip_with(&line, &signal, |m, s| m - s);
    (line, signal, hist)
}

/// Wilder RSI; 100 when the average loss is zero.
fn rsi(close: &[f64], n: usize) -> Series {
    let changes = diff(close, 1);
    let gains: Series = changes
        .iter()
        .map(|d| Some(d.filter(|d| *d > 0.0).unwrap_or(0.0)))
        .collect();
    let losses: Series = changes
        .iter()
        .map(|d| Some(d.filter(|d| *d < 0.0).map(|d| -d).unwrap_or(0.0)))
        .collect();
    let alpha = 1.0 / n as f64;
    let avg_gain = ewm(&gains, alpha, n);
    let avg_loss = ewm(&losses, alpha, n);
    avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(g, l)| match (g, l) {
            (Some(_), Some(l)) if *l == 0.0 => Some(100.0),
            (Some(g), Some(l)) => Some(100.0 - 100.0 / (1.0 + g / l)),
            _ => None,
        })
        .collect()
}

fn stochastic(high: &[f64], low: &[f64], close: &[f64], n: usize, smooth: usize) -> (Series, Series) {
    let lowest = rolling_min(&present(low), n);
    let highest = rolling_max(&present(high), n);
    let k: Series = (0..close.len())
        .map(|i| match (lowest[i], highest[i]) {
            (Some(l), Some(h)) => ratio(Some(close[i] - l), Some(h - l)).map(|r| r * 100.0),
            _ => None,
        })
        .collect();
    let d = rolling_mean(&k, smooth);
    (k, d)
}

fn williams_r(high: &[f64], low: &[f64], close: &[f64], n: usize) -> Series {
    let lowest = rolling_min(&present(low), n);
    let highest = rolling_max(&present(high), n);
    (0..close.len())
        .map(|i| match (lowest[i], highest[i]) {
            (Some(l), Some(h)) => ratio(Some(h - close[i]), Some(h - l)).map(|r| -100.0 * r),
            _ => None,
        })
        .collect()
}

/// ATR seeded with the mean of the first `n` true ranges, then Wilder smoothing.
fn atr(high: &[f64], low: &[f64], close: &[f64], n: usize) -> Series {
    let tr = true_range_seeded(high, low, close);
    let mut out = vec![None; tr.len()];
    if n == 0 || tr.len() < n {
        return out;
    }
    let mut prev = tr[..n].iter().sum::<f64>() / n as f64;
    out[n - 1] = Some(prev);
    for i in n..tr.len() {
        prev = (prev * (n as f64 - 1.0) + tr[i]) / n as f64;
        out[i] = Some(prev);
    }
    out
}

/// On-balance volume; a bar that does not close lower adds its volume.
fn obv(close: &[f64], volume: &[f64]) -> Series {
    let mut acc = 0.0;
    (0..close.len())
        .map(|i| {
            if i > 0 && close[i] < close[i - 1] {
                acc -= volume[i];
            } else {
                acc += volume[i];
            }
            Some(acc)
        })
        .collect()
}

struct Dmi {
    adx: Series,
    di_plus: Series,
    di_minus: Series,
}

/// Wilder's directional movement system.
fn directional_movement(high: &[f64], low: &[f64], close: &[f64], n: usize) -> Dmi {
    let len = close.len();
    let mut dmi = Dmi {
        adx: vec![None; len],
        di_plus: vec![None; len],
        di_minus: vec![None; len],
    };
    if n == 0 || len <= n {
        return dmi;
    }

    let tr = true_range_seeded(high, low, close);
    let mut plus_dm = vec![0.0; len];
    let mut minus_dm = vec![0.0; len];
    for i in 1..len {
        let up = high[i] - high[i - 1];
        let down = low[i - 1] - low[i];
        if up > down && up > 0.0 {
            plus_dm[i] = up;
        }
        if down > up && down > 0.0 {
            minus_dm[i] = down;
        }
    }

    let nf = n as f64;
    let mut s_tr: f64 = tr[1..=n].iter().sum();
    let mut s_plus: f64 = plus_dm[1..=n].iter().sum();
    let mut s_minus: f64 = minus_dm[1..=n].iter().sum();
    let mut dx = vec![None; len];
    for i in n..len {
        if i > n {
            s_tr = s_tr - s_tr / nf + tr[i];
            s_plus = s_plus - s_plus / nf + plus_dm[i];
            s_minus = s_minus - s_minus / nf + minus_dm[i];
        }
        let pdi = ratio(Some(s_plus), Some(s_tr)).map(|r| r * 100.0);
        let mdi = ratio(Some(s_minus), Some(s_tr)).map(|r| r * 100.0);
        dmi.di_plus[i] = pdi;
        dmi.di_minus[i] = mdi;
        dx[i] = match (pdi, mdi) {
            (Some(p), Some(m)) if p + m > 0.0 => Some(100.0 * (p - m).abs() / (p + m)),
            (Some(_), Some(_)) => Some(0.0),
            _ => None,
        };
    }

    let first = 2 * n - 1;
    if len <= first {
        return dmi;
    }
    let window: Vec<f64> = dx[n..=first].iter().flatten().copied().collect();
    if window.len() != n {
        return dmi;
    }
    let mut adx = window.iter().sum::<f64>() / nf;
    dmi.adx[first] = Some(adx);
    for i in first + 1..len {
        if let Some(d) = dx[i] {
            adx = (adx * (nf - 1.0) + d) / nf;
        }
        dmi.adx[i] = Some(adx);
    }
    dmi
}

fn cci(high: &[f64], low: &[f64], close: &[f64], n: usize) -> Series {
    let tp: Series = (0..close.len())
        .map(|i| Some((high[i] + low[i] + close[i]) / 3.0))
        .collect();
    let sma = rolling_mean(&tp, n);
    let mad = rolling_mad(&tp, n);
    (0..close.len())
        .map(|i| {
            let dev = zip_with(&[tp[i]], &[sma[i]], |t, s| t - s)[0];
            ratio(dev, mad[i].map(|m| 0.015 * m))
        })
        .collect()
}

/// Volume-weighted typical price, accumulated within each calendar day.
fn vwap(bars: &[PriceBar]) -> Series {
    let mut day = None;
    let mut pv = 0.0;
    let mut vol = 0.0;
    bars.iter()
        .map(|b| {
            if day != Some(b.date) {
                day = Some(b.date);
                pv = 0.0;
                vol = 0.0;
            }
            pv += (b.high + b.low + b.close) / 3.0 * b.volume;
            vol += b.volume;
            ratio(Some(pv), Some(vol))
        })
        .collect()
}

struct Sar {
    sar: Series,
    up: Series,
    down: Series,
}

/// Parabolic SAR starting in an up trend; the first two bars echo the close.
fn parabolic_sar(high: &[f64], low: &[f64], close: &[f64], step: f64, max_step: f64) -> Sar {
    let len = close.len();
    let mut psar: Vec<f64> = close.to_vec();
    let mut out = Sar {
        sar: present(close),
        up: vec![None; len],
        down: vec![None; len],
    };
    if len < 3 {
        return out;
    }

    let mut up_trend = true;
    let mut af = step;
    let mut extreme_high = high[0];
    let mut extreme_low = low[0];

    for i in 2..len {
        let mut reversal = false;
        if up_trend {
            psar[i] = psar[i - 1] + af * (extreme_high - psar[i - 1]);
            if low[i] < psar[i] {
                reversal = true;
                psar[i] = extreme_high;
                extreme_low = low[i];
                af = step;
            } else {
                if high[i] > extreme_high {
                    extreme_high = high[i];
                    af = (af + step).min(max_step);
                }
                if low[i - 2] < psar[i] {
                    psar[i] = low[i - 2];
                } else if low[i - 1] < psar[i] {
                    psar[i] = low[i - 1];
                }
            }
        } else {
            psar[i] = psar[i - 1] - af * (psar[i - 1] - extreme_low);
            if high[i] > psar[i] {
                reversal = true;
                psar[i] = extreme_low;
                extreme_high = high[i];
                af = step;
            } else {
                if low[i] < extreme_low {
                    extreme_low = low[i];
                    af = (af + step).min(max_step);
                }
                if high[i - 2] > psar[i] {
                    psar[i] = high[i - 2];
                } else if high[i - 1] > psar[i] {
                    psar[i] = high[i - 1];
                }
            }
        }
        up_trend = up_trend != reversal;
        out.sar[i] = Some(psar[i]);
        if up_trend {
            out.up[i] = Some(psar[i]);
        } else {
            out.down[i] = Some(psar[i]);
        }
    }
    out
}


#[cfg(test)]
mod tests {
    use super::test_support::{bars_from_closes, wave};
    use super::*;

    fn close_to(a: Option<f64>, b: f64, eps: f64) -> bool {
        a.map(|a| (a - b).abs() < eps).unwrap_or(false)
    }

    #[test]
    fn test_frame_lengths_match() {
        let frame = compute_indicators(bars_from_closes(&wave(80)));
        assert_eq!(frame.bars.len(), 80);
        assert_eq!(frame.rows.len(), 80);
    }

    #[test]
    fn test_warmup_lengths() {
        let frame = compute_indicators(bars_from_closes(&wave(80)));
        let r = &frame.rows;
        assert!(r[3].ma5.is_none() && r[4].ma5.is_some());
        assert!(r[18].ma20.is_none() && r[19].ma20.is_some());
        assert!(r[58].ma60.is_none() && r[59].ma60.is_some());
        assert!(r[24].macd.is_none() && r[25].macd.is_some());
        assert!(r[32].macd_signal.is_none() && r[33].macd_signal.is_some());
        assert!(r[12].rsi.is_none() && r[13].rsi.is_some());
        assert!(r[12].atr.is_none() && r[13].atr.is_some());
        assert!(r[12].kd_k.is_none() && r[13].kd_k.is_some());
        assert!(r[14].kd_d.is_none() && r[15].kd_d.is_some());
        assert!(r[26].adx.is_none() && r[27].adx.is_some());
        assert!(r[0].true_range.is_none() && r[1].true_range.is_some());
    }

    #[test]
    fn test_rsi_is_100_on_monotonic_rise() {
        let closes: Vec<f64> = (0..30).map(|i| 50.0 + i as f64).collect();
        let frame = compute_indicators(bars_from_closes(&closes));
        assert_eq!(frame.rows[29].rsi, Some(100.0));
        // highest high sits one point above the close of a 15-point range
        assert!(close_to(frame.rows[29].williams_r, -100.0 / 15.0, 1e-9));
    }

    #[test]
    fn test_bollinger_flat_series() {
        let frame = compute_indicators(bars_from_closes(&[10.0; 25]));
        let last = &frame.rows[24];
        assert_eq!(last.bb_upper, Some(10.0));
        assert_eq!(last.bb_lower, Some(10.0));
        assert_eq!(last.bb_width, Some(0.0));
        assert_eq!(last.bb_pband, None);
    }

    #[test]
    fn test_obv_accumulates_with_direction() {
        let frame = compute_indicators(bars_from_closes(&[10.0, 11.0, 10.5, 10.5]));
        let obv: Vec<f64> = frame.rows.iter().map(|r| r.obv.unwrap()).collect();
        // volumes 1000, 1010, 1020, 1030; equal close counts as up
        assert_eq!(obv, vec![1000.0, 2010.0, 990.0, 2020.0]);
    }

    #[test]
    fn test_atr_constant_range() {
        let frame = compute_indicators(bars_from_closes(&[20.0; 20]));
        assert!(close_to(frame.rows[13].atr, 2.0, 1e-12));
        assert!(close_to(frame.rows[19].atr_percent, 10.0, 1e-9));
    }

    #[test]
    fn test_vwap_on_daily_bars_is_typical_price() {
        let frame = compute_indicators(bars_from_closes(&[10.0, 12.0]));
        assert!(close_to(frame.rows[1].vwap, 12.0, 1e-12));
    }

    #[test]
    fn test_volume_ratio_and_roc() {
        let frame = compute_indicators(bars_from_closes(&wave(30)));
        let bars = &frame.bars;
        let row = &frame.rows[29];
        let mean20: f64 = bars[10..30].iter().map(|b| b.volume).sum::<f64>() / 20.0;
        assert!(close_to(row.volume_ratio, bars[29].volume / mean20 * 100.0, 1e-9));
        let expect = (bars[29].close - bars[24].close) / bars[24].close * 100.0;
        assert!(close_to(row.roc_5, expect, 1e-9));
    }

    #[test]
    fn test_sar_stays_below_price_in_steady_uptrend() {
        let closes: Vec<f64> = (0..15).map(|i| 100.0 + 2.0 * i as f64).collect();
        let frame = compute_indicators(bars_from_closes(&closes));
        for (bar, row) in frame.bars.iter().zip(&frame.rows).skip(2) {
            let sar = row.sar_up.expect("uptrend sar");
            assert!(sar < bar.low + 1e-9);
            assert!(row.sar_down.is_none());
        }
    }

    #[test]
    fn test_from_end() {
        let frame = compute_indicators(bars_from_closes(&[1.0, 2.0, 3.0]));
        assert_eq!(frame.from_end(0).unwrap().0.close, 3.0);
        assert_eq!(frame.from_end(2).unwrap().0.close, 1.0);
        assert!(frame.from_end(3).is_none());
    }
}
