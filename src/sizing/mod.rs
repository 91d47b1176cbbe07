//! Volatility-normalized position sizing.

use crate::config::RiskSettings;

/// Converts a signal into a risk-adjusted order notional.
pub struct PositionSizer {
    risk_target: f64,
    total_capital: f64,
    portfolio_size: f64,
    min_notional: f64,
}

impl PositionSizer {
    pub fn new(risk: &RiskSettings) -> Self {
        Self {
            risk_target: risk.risk_target,
            total_capital: risk.total_capital,
            portfolio_size: risk.portfolio_size,
            min_notional: risk.min_notional,
        }
    }

    /// Quote-currency notional for one order.
    ///
    /// Zero when volatility is unknown or degenerate (no ATR, or ATR <= 0)
    /// and when the computed notional falls below the exchange minimum.
    /// Sub-minimum orders are suppressed, never rounded up. The caller
    /// divides by the signal's limit price to get a base-asset quantity.
    pub fn compute_notional(&self, atr: Option<f64>) -> f64 {
        let Some(atr) = atr else {
            return 0.0;
        };
        if atr <= 0.0 {
            return 0.0;
        }

        let size = (1.0 / self.portfolio_size) * self.total_capital * (self.risk_target / atr);
        if size < self.min_notional {
            0.0
        } else {
            size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> PositionSizer {
        PositionSizer::new(&RiskSettings::default())
    }

    #[test]
    fn test_exact_formula() {
        // (1 / 10) * 3000 * (0.25 / 2.0) = 37.5
        assert_eq!(sizer().compute_notional(Some(2.0)), 37.5);
    }

    #[test]
    fn test_missing_atr_suppresses() {
        assert_eq!(sizer().compute_notional(None), 0.0);
    }

    #[test]
    fn test_degenerate_atr_suppresses() {
        assert_eq!(sizer().compute_notional(Some(0.0)), 0.0);
        assert_eq!(sizer().compute_notional(Some(-1.0)), 0.0);
    }

    #[test]
    fn test_below_minimum_suppresses() {
        // (1 / 10) * 3000 * (0.25 / 3.0) = 25, below the 30 floor
        assert_eq!(sizer().compute_notional(Some(3.0)), 0.0);
        // Right at the floor is allowed
        assert_eq!(sizer().compute_notional(Some(2.5)), 30.0);
    }
}
