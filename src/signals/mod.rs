//! Reversal signal detection and scoring.
//!
//! Detection looks at the trailing five sessions of an aligned
//! price/indicator pair. An indicator that is undefined at an index a rule
//! needs makes that rule false for the symbol — short history is a data
//! condition, not an error.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorSeries;
use crate::models::PriceBar;

/// Sessions inspected by every detector.
pub const LOOKBACK: usize = 5;

/// RSI level conventionally read as oversold.
pub const OVERSOLD_RSI: f64 = 30.0;

// ── Signal set ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSet {
    pub oversold: bool,
    pub macd_crossover: bool,
    pub sma20_cross: bool,
    pub rsi_rising_3d: bool,
    pub rsi_divergence: bool,
    pub macd_divergence: bool,
}

impl SignalSet {
    /// True when any confirmation signal backs the oversold reading.
    pub fn any_confirmation(&self) -> bool {
        self.macd_crossover
            || self.sma20_cross
            || self.rsi_rising_3d
            || self.rsi_divergence
            || self.macd_divergence
    }

    /// Labels of the triggered signals, in declaration order.
    pub fn triggered_labels(&self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.oversold {
            labels.push("RSI < 30 (oversold)");
        }
        if self.macd_crossover {
            labels.push("MACD bullish crossover");
        }
        if self.sma20_cross {
            labels.push("Price crossed above SMA20");
        }
        if self.rsi_rising_3d {
            labels.push("RSI rising 3 days");
        }
        if self.rsi_divergence {
            labels.push("Bullish RSI divergence");
        }
        if self.macd_divergence {
            labels.push("Bullish MACD divergence");
        }
        labels
    }
}

// ── Detection ─────────────────────────────────────────────────────────────────

pub fn detect(bars: &[PriceBar], ind: &IndicatorSeries) -> SignalSet {
    let n = bars.len();
    if n == 0 || ind.len() != n {
        return SignalSet::default();
    }
    let start = n.saturating_sub(LOOKBACK);

    let oversold =
        (start..n).any(|i| matches!(ind.rsi[i], Some(r) if r < OVERSOLD_RSI));

    // Crossovers need both sessions of the pair inside the window.
    let macd_crossover = (start + 1..n).any(|i| {
        matches!(
            (ind.macd[i - 1], ind.macd_signal[i - 1], ind.macd[i], ind.macd_signal[i]),
            (Some(pm), Some(ps), Some(cm), Some(cs)) if pm <= ps && cm > cs
        )
    });

    let sma20_cross = (start + 1..n).any(|i| {
        matches!(
            (ind.sma20[i - 1], ind.sma20[i]),
            (Some(ps), Some(cs)) if bars[i - 1].close <= ps && bars[i].close > cs
        )
    });

    let rsi_rising_3d = n >= 3
        && matches!(
            (ind.rsi[n - 3], ind.rsi[n - 2], ind.rsi[n - 1]),
            (Some(a), Some(b), Some(c)) if a < b && b < c
        );

    SignalSet {
        oversold,
        macd_crossover,
        sma20_cross,
        rsi_rising_3d,
        rsi_divergence: bullish_divergence(bars, &ind.rsi, start),
        macd_divergence: bullish_divergence(bars, &ind.macd, start),
    }
}

/// Bullish divergence against an oscillator: take the two lowest-close
/// sessions in the window (ties resolved most-recent-first); the later of the
/// two must print a lower close but a higher oscillator value.
fn bullish_divergence(bars: &[PriceBar], osc: &[Option<f64>], start: usize) -> bool {
    let n = bars.len();
    if n - start < 2 {
        return false;
    }
    let mut by_close: Vec<usize> = (start..n).collect();
    by_close.sort_by(|&a, &b| {
        bars[a]
            .close
            .partial_cmp(&bars[b].close)
            .unwrap_or(Ordering::Equal)
            .then(b.cmp(&a))
    });
    let (first, second) = (by_close[0], by_close[1]);
    let (earlier, later) = if first < second { (first, second) } else { (second, first) };

    match (osc[earlier], osc[later]) {
        (Some(before), Some(after)) => {
            bars[later].close < bars[earlier].close && after > before
        }
        _ => false,
    }
}

// ── Latest values ─────────────────────────────────────────────────────────────

/// Most recent defined value of each column, for persistence and scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatestValues {
    pub close: Option<f64>,
    pub rsi14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub sma20: Option<f64>,
}

pub fn latest_values(bars: &[PriceBar], ind: &IndicatorSeries) -> LatestValues {
    fn last_defined(xs: &[Option<f64>]) -> Option<f64> {
        xs.iter().rev().find_map(|v| *v)
    }
    LatestValues {
        close: bars.last().map(|b| b.close),
        rsi14: last_defined(&ind.rsi),
        macd: last_defined(&ind.macd),
        macd_signal: last_defined(&ind.macd_signal),
        sma20: last_defined(&ind.sma20),
    }
}

// ── Scoring ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub score: i32,
    pub recommended: bool,
    pub reason: String,
}

/// Weighted sum of confirmations plus an RSI-depth bonus. Recommendation
/// requires the oversold condition and at least one confirmation.
pub fn score(signals: &SignalSet, latest_rsi: Option<f64>) -> Assessment {
    let mut score = 0i32;
    if signals.macd_crossover {
        score += 3;
    }
    if signals.sma20_cross {
        score += 2;
    }
    if signals.macd_divergence {
        score += 2;
    }
    if signals.rsi_rising_3d {
        score += 1;
    }
    if signals.rsi_divergence {
        score += 1;
    }
    if let Some(rsi) = latest_rsi {
        score += (OVERSOLD_RSI - rsi).clamp(0.0, 5.0).round() as i32;
    }

    Assessment {
        score,
        recommended: signals.oversold && signals.any_confirmation(),
        reason: signals.triggered_labels().join(" + "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, NaiveDate};

    fn bars(closes: &[f64]) -> Vec<PriceBar> {
        let d0 = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar { date: d0 + Days::new(i as u64), close })
            .collect()
    }

    fn blank(n: usize) -> IndicatorSeries {
        IndicatorSeries {
            rsi: vec![None; n],
            macd: vec![None; n],
            macd_signal: vec![None; n],
            macd_histogram: vec![None; n],
            sma20: vec![None; n],
        }
    }

    fn filled(xs: &[f64]) -> Vec<Option<f64>> {
        xs.iter().copied().map(Some).collect()
    }

    #[test]
    fn oversold_any_of_last_five() {
        let b = bars(&[10.0; 8]);
        let mut ind = blank(8);
        ind.rsi = filled(&[50.0, 50.0, 29.0, 50.0, 50.0, 50.0, 50.0, 50.0]);
        // index 2 sits outside the 5-session window (3..=7) of an 8-bar series
        assert!(!detect(&b, &ind).oversold);
        ind.rsi[4] = Some(28.5);
        assert!(detect(&b, &ind).oversold);
    }

    #[test]
    fn macd_crossover_sign_change() {
        let b = bars(&[10.0; 6]);
        let mut ind = blank(6);
        ind.macd = filled(&[-1.0, -0.8, -0.6, -0.4, -0.1, 0.3]);
        ind.macd_signal = filled(&[-0.5, -0.5, -0.5, -0.3, -0.05, 0.1]);
        // prev: -0.1 <= -0.05, curr: 0.3 > 0.1
        assert!(detect(&b, &ind).macd_crossover);
    }

    #[test]
    fn macd_crossover_false_when_always_below() {
        let b = bars(&[10.0; 6]);
        let mut ind = blank(6);
        ind.macd = filled(&[-1.0, -0.9, -0.8, -0.7, -0.6, -0.5]);
        ind.macd_signal = filled(&[-0.4, -0.4, -0.4, -0.4, -0.4, -0.4]);
        assert!(!detect(&b, &ind).macd_crossover);
    }

    #[test]
    fn macd_crossover_false_for_flat_series() {
        let b = bars(&[10.0; 6]);
        let mut ind = blank(6);
        ind.macd = filled(&[0.2; 6]);
        ind.macd_signal = filled(&[0.2; 6]);
        assert!(!detect(&b, &ind).macd_crossover);
    }

    #[test]
    fn macd_crossover_outside_window_ignored() {
        // Cross happens between indices 1 and 2 of a 9-bar series; the
        // window covers indices 4..=8 only.
        let b = bars(&[10.0; 9]);
        let mut ind = blank(9);
        ind.macd = filled(&[-1.0, -0.5, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 1.1]);
        ind.macd_signal = filled(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(!detect(&b, &ind).macd_crossover);
    }

    #[test]
    fn macd_crossover_undefined_pair_is_false() {
        let b = bars(&[10.0; 6]);
        let mut ind = blank(6);
        ind.macd = vec![None, None, None, None, Some(-0.1), Some(0.3)];
        ind.macd_signal = vec![None, None, None, None, None, Some(0.1)];
        assert!(!detect(&b, &ind).macd_crossover);
    }

    #[test]
    fn sma20_cross_detected() {
        let b = bars(&[10.0, 10.0, 10.0, 10.0, 9.8, 10.4]);
        let mut ind = blank(6);
        ind.sma20 = filled(&[10.0, 10.0, 10.0, 10.0, 10.0, 10.1]);
        let s = detect(&b, &ind);
        assert!(s.sma20_cross);
    }

    #[test]
    fn rsi_rising_needs_strict_increase() {
        let b = bars(&[10.0; 5]);
        let mut ind = blank(5);
        ind.rsi = filled(&[40.0, 41.0, 25.0, 26.0, 27.0]);
        assert!(detect(&b, &ind).rsi_rising_3d);
        ind.rsi = filled(&[40.0, 41.0, 25.0, 26.0, 26.0]);
        assert!(!detect(&b, &ind).rsi_rising_3d);
    }

    #[test]
    fn rsi_divergence_lower_low_higher_rsi() {
        // Window lows at index 2 (close 9.0) and index 4 (close 8.6): the
        // later low is lower while RSI lifts 22 -> 27.
        let b = bars(&[10.0, 9.5, 9.0, 9.4, 8.6]);
        let mut ind = blank(5);
        ind.rsi = filled(&[45.0, 30.0, 22.0, 35.0, 27.0]);
        assert!(detect(&b, &ind).rsi_divergence);
    }

    #[test]
    fn rsi_divergence_false_when_oscillator_confirms() {
        // RSI falls with price: the new low is weaker, no divergence.
        let b = bars(&[10.0, 9.5, 9.0, 9.4, 8.6]);
        let mut ind = blank(5);
        ind.rsi = filled(&[45.0, 30.0, 22.0, 35.0, 18.0]);
        assert!(!detect(&b, &ind).rsi_divergence);
    }

    #[test]
    fn rsi_divergence_false_on_higher_low() {
        // Later low prints above the earlier low; the rule needs a lower low.
        let b = bars(&[10.0, 9.5, 8.6, 9.4, 9.0]);
        let mut ind = blank(5);
        ind.rsi = filled(&[45.0, 30.0, 22.0, 35.0, 27.0]);
        assert!(!detect(&b, &ind).rsi_divergence);
    }

    #[test]
    fn rsi_divergence_undefined_low_is_false() {
        let b = bars(&[10.0, 9.5, 9.0, 9.4, 8.6]);
        let mut ind = blank(5);
        ind.rsi = vec![Some(45.0), Some(30.0), None, Some(35.0), Some(27.0)];
        assert!(!detect(&b, &ind).rsi_divergence);
    }

    #[test]
    fn macd_divergence_uses_macd_line() {
        let b = bars(&[10.0, 9.5, 9.0, 9.4, 8.6]);
        let mut ind = blank(5);
        ind.macd = filled(&[-0.2, -0.5, -0.9, -0.4, -0.6]);
        assert!(detect(&b, &ind).macd_divergence);
        ind.macd = filled(&[-0.2, -0.5, -0.9, -0.4, -1.2]);
        assert!(!detect(&b, &ind).macd_divergence);
    }

    #[test]
    fn latest_values_take_last_defined() {
        let b = bars(&[10.0, 11.0, 12.0]);
        let mut ind = blank(3);
        ind.rsi = vec![Some(40.0), Some(45.0), None];
        ind.sma20 = vec![None, Some(10.5), Some(11.0)];
        let latest = latest_values(&b, &ind);
        assert_eq!(latest.close, Some(12.0));
        assert_eq!(latest.rsi14, Some(45.0));
        assert_eq!(latest.sma20, Some(11.0));
        assert_eq!(latest.macd, None);
    }

    #[test]
    fn score_weights_and_bonus() {
        let signals = SignalSet {
            oversold: true,
            macd_crossover: true,
            sma20_cross: false,
            rsi_rising_3d: true,
            rsi_divergence: false,
            macd_divergence: false,
        };
        let a = score(&signals, Some(22.0));
        // 3 (crossover) + 1 (rising) + 5 (clamped RSI depth) = 9
        assert_eq!(a.score, 9);
        assert!(a.recommended);
        assert_eq!(
            a.reason,
            "RSI < 30 (oversold) + MACD bullish crossover + RSI rising 3 days"
        );
    }

    #[test]
    fn score_without_oversold_is_not_recommended() {
        let signals = SignalSet { macd_crossover: true, ..SignalSet::default() };
        let a = score(&signals, Some(55.0));
        assert_eq!(a.score, 3);
        assert!(!a.recommended);
    }

    #[test]
    fn score_nothing_triggered() {
        let a = score(&SignalSet::default(), None);
        assert_eq!(a.score, 0);
        assert!(!a.recommended);
        assert_eq!(a.reason, "");
    }

    #[test]
    fn score_bonus_clamps_and_rounds() {
        let oversold_only = SignalSet { oversold: true, ..SignalSet::default() };
        assert_eq!(score(&oversold_only, Some(27.3)).score, 3); // 2.7 rounds up
        assert_eq!(score(&oversold_only, Some(10.0)).score, 5); // clamped
        assert_eq!(score(&oversold_only, Some(60.0)).score, 0); // negative -> 0
    }
}
