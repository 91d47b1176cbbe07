//! Trend-phase and volume-spike signal detection.
//!
//! The engine is a pure function of one symbol's candle history: it holds no
//! mutable state, recomputes every indicator from the raw series, and emits
//! the same signal sequence for the same input on every run.

use crate::indicators::sma_series;
use crate::models::{Candle, Phase, SignalEvent, Side};

#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub short_window: usize,
    pub long_window: usize,
    pub volume_window: usize,
    pub volume_threshold: f64,
    pub sr_window: usize,
    pub atr_period: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            short_window: 10,
            long_window: 100,
            volume_window: 20,
            volume_threshold: 2.0,
            sr_window: 20,
            atr_period: 14,
        }
    }
}

pub struct SignalEngine {
    config: SignalConfig,
}

impl SignalEngine {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Classify the trend phase of each candle from the short vs long SMA of
    /// the close. Unclassified (`None`) until the long window has elapsed.
    pub fn classify_phases(&self, candles: &[Candle]) -> Vec<Option<Phase>> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let short = sma_series(&closes, self.config.short_window);
        let long = sma_series(&closes, self.config.long_window);

        (0..candles.len())
            .map(|i| match (short[i], long[i]) {
                (Some(s), Some(l)) if s > l => Some(Phase::Markup),
                (Some(s), Some(l)) if s < l => Some(Phase::Markdown),
                (Some(_), Some(_)) => Some(Phase::Neutral),
                _ => None,
            })
            .collect()
    }

    /// Flag candles whose volume exceeds `threshold` times the rolling mean
    /// volume. Undefined (`None`) during the volume warm-up window.
    pub fn detect_volume_spikes(&self, candles: &[Candle]) -> Vec<Option<bool>> {
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
        let avg = sma_series(&volumes, self.config.volume_window);

        (0..candles.len())
            .map(|i| avg[i].map(|a| volumes[i] > self.config.volume_threshold * a))
            .collect()
    }

    /// Rolling support/resistance: min and max close over the trailing
    /// window ending at the last element of `closes`.
    pub fn support_resistance(&self, closes: &[f64]) -> Option<(f64, f64)> {
        if closes.is_empty() {
            return None;
        }
        let start = closes.len().saturating_sub(self.config.sr_window);
        let window = &closes[start..];
        let support = window.iter().copied().fold(f64::INFINITY, f64::min);
        let resistance = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some((support, resistance))
    }

    /// Pick the limit price for a signal at the end of `closes`.
    ///
    /// Below the short SMA the price rests at support, above the long SMA at
    /// resistance, otherwise at the short SMA. The rule is the same for buys
    /// and sells; see DESIGN.md for why that asymmetry is kept.
    fn determine_limit_price(
        &self,
        closes: &[f64],
        short_sma: f64,
        long_sma: f64,
    ) -> Option<f64> {
        let (support, resistance) = self.support_resistance(closes)?;
        let close = *closes.last()?;

        let limit = if close < short_sma {
            support
        } else if close > long_sma {
            resistance
        } else {
            short_sma
        };
        Some(limit)
    }

    /// Scan one symbol's candles in chronological order and emit a signal
    /// for every candle that is both phase-classified and volume-spiking.
    ///
    /// Deterministic and restartable: the same input yields the same
    /// sequence. Consecutive qualifying candles are not deduplicated.
    pub fn generate_signals(&self, candles: &[Candle]) -> Vec<SignalEvent> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let short = sma_series(&closes, self.config.short_window);
        let long = sma_series(&closes, self.config.long_window);
        let phases = self.classify_phases(candles);
        let spikes = self.detect_volume_spikes(candles);

        let mut signals = Vec::new();
        for i in 0..candles.len() {
            let (Some(phase), Some(true)) = (phases[i], spikes[i]) else {
                continue;
            };
            let side = match phase {
                Phase::Markup => Side::Buy,
                Phase::Markdown => Side::Sell,
                Phase::Neutral => continue,
            };
            let (Some(short_sma), Some(long_sma)) = (short[i], long[i]) else {
                continue;
            };
            let Some(limit_price) = self.determine_limit_price(&closes[..=i], short_sma, long_sma)
            else {
                continue;
            };

            signals.push(SignalEvent {
                timestamp: candles[i].timestamp,
                symbol: candles[i].symbol.clone(),
                side,
                limit_price,
            });
        }

        signals
    }
}

impl Default for SignalEngine {
    fn default() -> Self {
        Self::new(SignalConfig::default())
    }
}
