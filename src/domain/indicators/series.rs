//! Column primitives over price series.
//!
//! A series is `Vec<Option<f64>>`: `None` marks warm-up bars or undefined
//! values (division by zero). Rolling windows require every value in the
//! window to be present.

pub type Series = Vec<Option<f64>>;

/// `a / b`, `None` when either side is missing or the result is not finite.
pub fn ratio(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) if b != 0.0 => Some(a / b).filter(|v| v.is_finite()),
        _ => None,
    }
}

pub fn present(values: &[f64]) -> Series {
    values.iter().map(|v| Some(*v)).collect()
}

/// Apply `f` to each full window of `n` present values.
fn rolling(values: &[Option<f64>], n: usize, f: impl Fn(&[f64]) -> f64) -> Series {
    let mut out = vec![None; values.len()];
    if n == 0 {
        return out;
    }
    let mut buf = Vec::with_capacity(n);
    for i in (n.saturating_sub(1))..values.len() {
        buf.clear();
        buf.extend(values[i + 1 - n..=i].iter().flatten());
        if buf.len() == n {
            out[i] = Some(f(&buf)).filter(|v| v.is_finite());
        }
    }
    out
}

pub fn rolling_mean(values: &[Option<f64>], n: usize) -> Series {
    rolling(values, n, mean)
}

/// Population standard deviation (ddof = 0).
pub fn rolling_std(values: &[Option<f64>], n: usize) -> Series {
    rolling(values, n, |w| {
        let m = mean(w);
        (w.iter().map(|v| (v - m).powi(2)).sum::<f64>() / w.len() as f64).sqrt()
    })
}

pub fn rolling_min(values: &[Option<f64>], n: usize) -> Series {
    rolling(values, n, |w| w.iter().copied().fold(f64::INFINITY, f64::min))
}

pub fn rolling_max(values: &[Option<f64>], n: usize) -> Series {
    rolling(values, n, |w| w.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

/// Mean absolute deviation around the window mean.
pub fn rolling_mad(values: &[Option<f64>], n: usize) -> Series {
    rolling(values, n, |w| {
        let m = mean(w);
        w.iter().map(|v| (v - m).abs()).sum::<f64>() / w.len() as f64
    })
}

fn mean(w: &[f64]) -> f64 {
    w.iter().sum::<f64>() / w.len() as f64
}

/// Exponentially weighted mean without bias adjustment: seeded with the
/// first present value, `y = (1 - alpha) * y + alpha * x` afterwards.
/// Output is hidden until `min_periods` present values were seen; missing
/// inputs carry the previous mean forward.
pub fn ewm(values: &[Option<f64>], alpha: f64, min_periods: usize) -> Series {
    let mut state: Option<f64> = None;
    let mut seen = 0usize;
    values
        .iter()
        .map(|x| {
            if let Some(x) = x {
                state = Some(match state {
                    None => *x,
                    Some(s) => (1.0 - alpha) * s + alpha * x,
                });
                seen += 1;
            }
            if seen >= min_periods.max(1) {
                state
            } else {
                None
            }
        })
        .collect()
}

/// EMA with span `n` (alpha = 2 / (n + 1)), hidden for the first `n - 1` values.
pub fn ema(values: &[Option<f64>], n: usize) -> Series {
    ewm(values, 2.0 / (n as f64 + 1.0), n)
}

/// `values[i] - values[i - lag]`.
pub fn diff(values: &[f64], lag: usize) -> Series {
    (0..values.len())
        .map(|i| (i >= lag).then(|| values[i] - values[i - lag]))
        .collect()
}

/// True range against the previous close; the first bar has no previous
/// close and falls back to `high - low`.
pub fn true_range_seeded(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    (0..close.len())
        .map(|i| {
            let hl = high[i] - low[i];
            if i == 0 {
                hl
            } else {
                let pc = close[i - 1];
                hl.max((high[i] - pc).abs()).max((low[i] - pc).abs())
            }
        })
        .collect()
}

pub fn zip_with(a: &[Option<f64>], b: &[Option<f64>], f: impl Fn(f64, f64) -> f64) -> Series {
    a.iter()
        .zip(b)
        .map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) => Some(f(*a, *b)).filter(|v| v.is_finite()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.map(|a| (a - b).abs() < 1e-9).unwrap_or(false)
    }

    #[test]
    fn test_rolling_mean_warmup() {
        let s = rolling_mean(&present(&[1.0, 2.0, 3.0, 4.0]), 3);
        assert_eq!(s[0], None);
        assert_eq!(s[1], None);
        assert!(approx(s[2], 2.0));
        assert!(approx(s[3], 3.0));
    }

    #[test]
    fn test_rolling_skips_windows_with_gaps() {
        let s = rolling_mean(&[Some(1.0), None, Some(3.0), Some(5.0)], 2);
        assert_eq!(s[1], None);
        assert_eq!(s[2], None);
        assert!(approx(s[3], 4.0));
    }

    #[test]
    fn test_rolling_std_population() {
        let s = rolling_std(&present(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 8);
        assert!(approx(s[7], 2.0));
    }

    #[test]
    fn test_ewm_seeded_with_first_value() {
        let s = ewm(&present(&[10.0, 20.0]), 0.5, 1);
        assert!(approx(s[0], 10.0));
        assert!(approx(s[1], 15.0));
    }

    #[test]
    fn test_ema_hidden_until_span() {
        let s = ema(&present(&[1.0, 2.0, 3.0]), 3);
        assert_eq!(s[1], None);
        // alpha = 0.5: 1 -> 1.5 -> 2.25
        assert!(approx(s[2], 2.25));
    }

    #[test]
    fn test_ewm_skips_leading_gaps() {
        let s = ewm(&[None, None, Some(4.0), Some(8.0)], 0.5, 2);
        assert_eq!(s[2], None);
        assert!(approx(s[3], 6.0));
    }

    #[test]
    fn test_ratio_guards_zero() {
        assert_eq!(ratio(Some(1.0), Some(0.0)), None);
        assert_eq!(ratio(None, Some(2.0)), None);
        assert_eq!(ratio(Some(1.0), Some(2.0)), Some(0.5));
    }
}
