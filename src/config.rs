use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub markets: MarketsConfig,
    #[serde(default)]
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub plots: PlotsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketsConfig {
    #[serde(default = "default_kalshi_url")]
    pub base_url: String,
    #[serde(default = "default_series_ticker")]
    pub series_ticker: String,
    /// Server-side status filter passed to the list endpoint
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
    #[serde(default = "default_max_markets")]
    pub max_markets: usize,
    #[serde(default = "default_days_back")]
    pub days_back: i64,
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,
    #[serde(default = "default_period_interval")]
    pub period_interval_minutes: u32,
    #[serde(default = "default_true")]
    pub fallback_to_active: bool,
    #[serde(default = "default_panel_file")]
    pub panel_file: String,
    #[serde(default)]
    pub survey_series: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceConfig {
    #[serde(default = "default_yahoo_url")]
    pub base_url: String,
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,
    #[serde(default = "default_reference_file")]
    pub output_file: String,
    #[serde(default = "default_series")]
    pub series: Vec<SeriesSymbol>,
}

/// Friendly column name mapped to a provider symbol, e.g. `VIX` -> `^VIX`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SeriesSymbol {
    pub name: String,
    pub symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_target_column")]
    pub target_column: String,
    #[serde(default)]
    pub threshold: ThresholdPolicy,
    #[serde(default = "default_granger_lag")]
    pub max_granger_lag: usize,
    #[serde(default = "default_lead_lag")]
    pub max_lead_lag: usize,
    #[serde(default = "default_significance")]
    pub significance: f64,
    #[serde(default)]
    pub scan_thresholds: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlotsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_plot_width")]
    pub width: u32,
    #[serde(default = "default_plot_height")]
    pub height: u32,
}

/// How the representative threshold is chosen from the market panel.
///
/// `"median"` picks the distinct threshold at index `len / 2`; a number pins the
/// signal to that threshold.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(try_from = "RawThresholdPolicy")]
pub enum ThresholdPolicy {
    #[default]
    Median,
    Fixed(f64),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawThresholdPolicy {
    Value(f64),
    Named(String),
}

impl TryFrom<RawThresholdPolicy> for ThresholdPolicy {
    type Error = String;

    fn try_from(raw: RawThresholdPolicy) -> Result<Self, Self::Error> {
        match raw {
            RawThresholdPolicy::Value(v) => Ok(ThresholdPolicy::Fixed(v)),
            RawThresholdPolicy::Named(name) if name.eq_ignore_ascii_case("median") => {
                Ok(ThresholdPolicy::Median)
            }
            RawThresholdPolicy::Named(name) => name
                .parse::<f64>()
                .map(ThresholdPolicy::Fixed)
                .map_err(|_| format!("unknown threshold policy: {}", name)),
        }
    }
}

fn default_data_dir() -> String { "data".to_string() }
fn default_output_dir() -> String { "outputs".to_string() }
fn default_kalshi_url() -> String { "https://api.elections.kalshi.com/trade-api/v2".to_string() }
fn default_series_ticker() -> String { "KXCPICOREYOY".to_string() }
fn default_status() -> String { "settled".to_string() }
fn default_list_limit() -> usize { 1000 }
fn default_max_markets() -> usize { 100 }
fn default_days_back() -> i64 { 365 }
fn default_request_delay() -> u64 { 500 }
fn default_period_interval() -> u32 { 1440 }
fn default_true() -> bool { true }
fn default_panel_file() -> String { "kalshi_threshold_panel.csv".to_string() }
fn default_yahoo_url() -> String { "https://query1.finance.yahoo.com".to_string() }
fn default_reference_file() -> String { "yahoo_iv_proxy.csv".to_string() }
fn default_target_column() -> String { "VIX".to_string() }
fn default_granger_lag() -> usize { 5 }
fn default_lead_lag() -> usize { 10 }
fn default_significance() -> f64 { 0.05 }
fn default_plot_width() -> u32 { 1200 }
fn default_plot_height() -> u32 { 600 }

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn default_series() -> Vec<SeriesSymbol> {
    [("VIX", "^VIX"), ("SPX", "^GSPC"), ("VIX9D", "^VIX9D"), ("VIX1D", "^VIX1D")]
        .into_iter()
        .map(|(name, symbol)| SeriesSymbol {
            name: name.to_string(),
            symbol: symbol.to_string(),
        })
        .collect()
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            output_dir: default_output_dir(),
        }
    }
}

impl Default for MarketsConfig {
    fn default() -> Self {
        Self {
            base_url: default_kalshi_url(),
            series_ticker: default_series_ticker(),
            status: default_status(),
            list_limit: default_list_limit(),
            max_markets: default_max_markets(),
            days_back: default_days_back(),
            request_delay_ms: default_request_delay(),
            period_interval_minutes: default_period_interval(),
            fallback_to_active: true,
            panel_file: default_panel_file(),
            survey_series: Vec::new(),
        }
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_yahoo_url(),
            start_date: default_start_date(),
            output_file: default_reference_file(),
            series: default_series(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            target_column: default_target_column(),
            threshold: ThresholdPolicy::Median,
            max_granger_lag: default_granger_lag(),
            max_lead_lag: default_lead_lag(),
            significance: default_significance(),
            scan_thresholds: false,
        }
    }
}

impl Default for PlotsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: default_plot_width(),
            height: default_plot_height(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub config_path: String,
    pub kalshi_base_url: Option<String>,
    pub yahoo_base_url: Option<String>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(url) = &env.kalshi_base_url {
            self.markets.base_url = url.clone();
        }
        if let Some(url) = &env.yahoo_base_url {
            self.reference.base_url = url.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.analysis.max_granger_lag == 0 {
            bail!("analysis.max_granger_lag must be at least 1");
        }
        if !(self.analysis.significance > 0.0 && self.analysis.significance < 1.0) {
            bail!(
                "analysis.significance must lie in (0, 1), got {}",
                self.analysis.significance
            );
        }
        if self.reference.series.is_empty() {
            bail!("reference.series must name at least one symbol");
        }
        if self.markets.days_back <= 0 {
            bail!("markets.days_back must be positive");
        }
        Ok(())
    }
}

impl EnvConfig {
    pub fn load() -> Self {
        dotenv::dotenv().ok();

        Self {
            config_path: std::env::var("PIPELINE_CONFIG")
                .unwrap_or_else(|_| "config.toml".to_string()),
            kalshi_base_url: std::env::var("KALSHI_BASE_URL").ok(),
            yahoo_base_url: std::env::var("YAHOO_BASE_URL").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_repository_config() {
        let config = Config::load("config.toml").unwrap();

        assert_eq!(config.markets.series_ticker, "KXCPICOREYOY");
        assert_eq!(config.analysis.threshold, ThresholdPolicy::Median);
        assert_eq!(config.analysis.max_granger_lag, 5);
        assert_eq!(config.reference.series[0].name, "VIX");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.system.data_dir, "data");
        assert_eq!(config.markets.period_interval_minutes, 1440);
        assert_eq!(config.reference.series.len(), 4);
        assert!((config.analysis.significance - 0.05).abs() < 1e-12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_policy_parsing() {
        let config: Config = toml::from_str("[analysis]\nthreshold = 2.7\n").unwrap();
        assert_eq!(config.analysis.threshold, ThresholdPolicy::Fixed(2.7));

        let config: Config = toml::from_str("[analysis]\nthreshold = \"MEDIAN\"\n").unwrap();
        assert_eq!(config.analysis.threshold, ThresholdPolicy::Median);

        assert!(toml::from_str::<Config>("[analysis]\nthreshold = \"best\"\n").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_lag() {
        let mut config = Config::default();
        config.analysis.max_granger_lag = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_base_urls() {
        let mut config = Config::default();
        let env = EnvConfig {
            config_path: "config.toml".to_string(),
            kalshi_base_url: Some("http://localhost:9000".to_string()),
            yahoo_base_url: None,
        };
        config.apply_env(&env);

        assert_eq!(config.markets.base_url, "http://localhost:9000");
        assert_eq!(config.reference.base_url, "https://query1.finance.yahoo.com");
    }
}
