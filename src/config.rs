use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Process-wide settings, loaded once at startup and read-only afterwards.
///
/// Sources are layered: an optional config file (TOML), then environment
/// variables prefixed with `SMARTFLOW` (double underscore as separator,
/// e.g. `SMARTFLOW__RISK__MAX_LOSS=500`).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub data_dir: PathBuf,
    pub symbols: Vec<String>,
    #[serde(default)]
    pub risk: RiskSettings,
    #[serde(default)]
    pub execution: ExecutionSettings,
    /// Seconds between trading cycles. Must exceed worst-case cycle latency.
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    /// Seconds between market-data refreshes.
    #[serde(default = "default_feed_interval")]
    pub feed_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSettings {
    pub api_key: String,
    pub api_secret: String,
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskSettings {
    #[serde(default = "default_risk_target")]
    pub risk_target: f64,
    #[serde(default = "default_total_capital")]
    pub total_capital: f64,
    #[serde(default = "default_portfolio_size")]
    pub portfolio_size: f64,
    #[serde(default = "default_max_loss")]
    pub max_loss: f64,
    /// Orders below this quote-currency notional are suppressed.
    #[serde(default = "default_min_notional")]
    pub min_notional: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSettings {
    #[serde(default = "default_passive_limit")]
    pub passive_time_limit_secs: u64,
    #[serde(default = "default_total_limit")]
    pub total_time_limit_secs: u64,
    #[serde(default = "default_max_imbalance")]
    pub max_imbalance: f64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            risk_target: default_risk_target(),
            total_capital: default_total_capital(),
            portfolio_size: default_portfolio_size(),
            max_loss: default_max_loss(),
            min_notional: default_min_notional(),
        }
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            passive_time_limit_secs: default_passive_limit(),
            total_time_limit_secs: default_total_limit(),
            max_imbalance: default_max_imbalance(),
            tick_interval_secs: default_tick_interval(),
        }
    }
}

fn default_rest_url() -> String {
    "https://api.exchange.coinbase.com".to_string()
}
fn default_risk_target() -> f64 {
    0.25
}
fn default_total_capital() -> f64 {
    3000.0
}
fn default_portfolio_size() -> f64 {
    10.0
}
fn default_max_loss() -> f64 {
    1000.0
}
fn default_min_notional() -> f64 {
    30.0
}
fn default_passive_limit() -> u64 {
    300
}
fn default_total_limit() -> u64 {
    600
}
fn default_max_imbalance() -> f64 {
    5.0
}
fn default_tick_interval() -> u64 {
    1
}
fn default_cycle_interval() -> u64 {
    300
}
fn default_feed_interval() -> u64 {
    300
}

impl Settings {
    /// Load settings from the given file (or `smartflow.toml` if present)
    /// plus the environment.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(p) => builder.add_source(config::File::from(p)),
            None => builder.add_source(config::File::with_name("smartflow").required(false)),
        };
        let cfg = builder
            .add_source(config::Environment::with_prefix("SMARTFLOW").separator("__"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_defaults() {
        let risk = RiskSettings::default();
        assert_eq!(risk.risk_target, 0.25);
        assert_eq!(risk.total_capital, 3000.0);
        assert_eq!(risk.portfolio_size, 10.0);
        assert_eq!(risk.max_loss, 1000.0);
        assert_eq!(risk.min_notional, 30.0);
    }

    #[test]
    fn test_execution_defaults() {
        let exec = ExecutionSettings::default();
        assert_eq!(exec.passive_time_limit_secs, 300);
        assert_eq!(exec.total_time_limit_secs, 600);
        assert_eq!(exec.max_imbalance, 5.0);
        assert_eq!(exec.tick_interval_secs, 1);
    }
}
