//! Indicator math over a close-price series.
//!
//! Every function returns a series index-aligned to its input; entries before
//! enough history exists are `None`, never zero. Nothing here touches the
//! network or the clock, and nothing fails: a too-short input just yields an
//! all-`None` series.

use crate::models::PriceBar;

pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const SMA_PERIOD: usize = 20;

/// Floor for normal screening. Below this the MACD signal line is barely
/// born and crossover history is meaningless, so the symbol is recorded as
/// ignored instead.
pub const MIN_SESSIONS: usize = 35;

// ── Primitives ────────────────────────────────────────────────────────────────

/// Simple rolling mean of the trailing `period` values.
pub fn sma(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period {
        return out;
    }
    let mut window_sum: f64 = closes[..period].iter().sum();
    out[period - 1] = Some(window_sum / period as f64);
    for i in period..closes.len() {
        window_sum += closes[i] - closes[i - period];
        out[i] = Some(window_sum / period as f64);
    }
    out
}

/// Exponential moving average seeded with the simple average of the first
/// `period` values, then smoothed with k = 2/(period+1).
pub fn ema(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period {
        return out;
    }
    let seed: f64 = closes[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);
    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = seed;
    for i in period..closes.len() {
        prev = closes[i] * k + prev * (1.0 - k);
        out[i] = Some(prev);
    }
    out
}

/// Wilder RSI: initial averages over the first `period` differences, then
/// `avg = (avg*(period-1) + value) / period` per step. A zero average loss
/// pins RSI at 100.
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = closes.len();
    let mut out = vec![None; n];
    if period == 0 || n <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let diff = closes[i] - closes[i - 1];
        if diff >= 0.0 {
            avg_gain += diff;
        } else {
            avg_loss += -diff;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    let p = period as f64;
    for i in (period + 1)..n {
        let diff = closes[i] - closes[i - 1];
        let (gain, loss) = if diff >= 0.0 { (diff, 0.0) } else { (0.0, -diff) };
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
        out[i] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

// ── MACD ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct MacdSeries {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

/// MACD line = EMA(fast) − EMA(slow); signal = EMA(signal_period) of the
/// defined MACD values, seeded the same way as [`ema`]; histogram = MACD −
/// signal where both exist.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdSeries {
    let n = closes.len();
    let ema_fast = ema(closes, fast);
    let ema_slow = ema(closes, slow);

    let mut line = vec![None; n];
    for i in 0..n {
        if let (Some(f), Some(s)) = (ema_fast[i], ema_slow[i]) {
            line[i] = Some(f - s);
        }
    }

    // The signal line smooths only the defined stretch of the MACD line, so
    // its seed sits signal_period valid entries after the line begins.
    let valid: Vec<(usize, f64)> = line
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();

    let mut signal = vec![None; n];
    if signal_period > 0 && valid.len() >= signal_period {
        let seed: f64 =
            valid[..signal_period].iter().map(|(_, v)| v).sum::<f64>() / signal_period as f64;
        let (seed_idx, _) = valid[signal_period - 1];
        signal[seed_idx] = Some(seed);
        let k = 2.0 / (signal_period as f64 + 1.0);
        let mut prev = seed;
        for &(i, v) in &valid[signal_period..] {
            prev = v * k + prev * (1.0 - k);
            signal[i] = Some(prev);
        }
    }

    let mut histogram = vec![None; n];
    for i in 0..n {
        if let (Some(m), Some(s)) = (line[i], signal[i]) {
            histogram[i] = Some(m - s);
        }
    }

    MacdSeries { macd: line, signal, histogram }
}

// ── Bundle ────────────────────────────────────────────────────────────────────

/// All indicator series for one price series, index-aligned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub rsi: Vec<Option<f64>>,
    pub macd: Vec<Option<f64>>,
    pub macd_signal: Vec<Option<f64>>,
    pub macd_histogram: Vec<Option<f64>>,
    pub sma20: Vec<Option<f64>>,
}

impl IndicatorSeries {
    /// Pure computation with the standard parameter set: RSI(14),
    /// MACD(12,26,9), SMA(20). A short series produces all-`None` columns.
    pub fn compute(bars: &[PriceBar]) -> Self {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let MacdSeries { macd: line, signal, histogram } =
            macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        IndicatorSeries {
            rsi: rsi(&closes, RSI_PERIOD),
            macd: line,
            macd_signal: signal,
            macd_histogram: histogram,
            sma20: sma(&closes, SMA_PERIOD),
        }
    }

    pub fn len(&self) -> usize {
        self.rsi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rsi.is_empty()
    }
}
