/// Average True Range (ATR) indicator
///
/// Measures volatility as the rolling mean of true ranges. True Range is the
/// greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// Unlike the SMA-based indicators, early rows average over however many
/// true ranges exist so far (minimum one) instead of being undefined. Only
/// index 0 has no value, because it has no previous close.
use crate::models::Candle;

/// Per-candle ATR values, aligned by index with the input.
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    if period == 0 || candles.len() < 2 {
        return out;
    }

    let mut true_ranges: Vec<f64> = Vec::with_capacity(candles.len() - 1);
    for i in 1..candles.len() {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_close = candles[i - 1].close;

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        true_ranges.push(tr);

        let start = true_ranges.len().saturating_sub(period);
        let window = &true_ranges[start..];
        out[i] = Some(window.iter().sum::<f64>() / window.len() as f64);
    }

    out
}

/// Most recent ATR for the series, or `None` when fewer than two candles.
pub fn latest_atr(candles: &[Candle], period: usize) -> Option<f64> {
    atr_series(candles, period).last().copied().flatten()
}
