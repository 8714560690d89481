use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EastmoneyProviderConfig {
    /// Fund directory and NAV history host.
    pub fund_base_url: String,
    /// Live estimate (JSONP) host.
    pub estimate_base_url: String,
    /// Holdings and asset allocation pages.
    pub f10_base_url: String,
    /// Daily and intraday bars.
    pub kline_base_url: String,
    /// Stock information such as industry.
    #[serde(default = "default_quote_base_url")]
    pub quote_base_url: String,
}

fn default_quote_base_url() -> String {
    "https://push2.eastmoney.com".to_string()
}

impl Default for EastmoneyProviderConfig {
    fn default() -> Self {
        Self {
            fund_base_url: "https://fund.eastmoney.com".to_string(),
            estimate_base_url: "https://fundgz.1234567.com.cn".to_string(),
            f10_base_url: "https://fundf10.eastmoney.com".to_string(),
            kline_base_url: "https://push2his.eastmoney.com".to_string(),
            quote_base_url: default_quote_base_url(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SinaProviderConfig {
    pub base_url: String,
}

impl Default for SinaProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://hq.sinajs.cn".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub eastmoney: Option<EastmoneyProviderConfig>,
    pub sina: Option<SinaProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            eastmoney: Some(EastmoneyProviderConfig::default()),
            sina: Some(SinaProviderConfig::default()),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TrackerConfig {
    /// Pause between sweeps while the market is open.
    pub interval_secs: u64,
    /// Pause after an unexpected sweep failure.
    pub retry_secs: u64,
    /// Pause between two funds within a sweep.
    pub fund_delay_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            retry_secs: 60,
            fund_delay_ms: 1000,
        }
    }
}

impl TrackerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }

    pub fn fund_delay(&self) -> Duration {
        Duration::from_millis(self.fund_delay_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BacktestConfig {
    /// Trading days replayed per fund.
    pub days: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self { days: 30 }
    }
}

fn default_http_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    pub data_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            providers: ProvidersConfig::default(),
            tracker: TrackerConfig::default(),
            backtest: BacktestConfig::default(),
            http_timeout_secs: default_http_timeout_secs(),
            data_path: None,
        }
    }
}

impl AppConfig {
    /// Loads the config from the default location, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(
                "No config at {}, using built-in defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "navcast", "navcast")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("io", "navcast", "navcast")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_empty_yaml() {
        let config: AppConfig = serde_yaml::from_str("{}").expect("Failed to deserialize");
        assert_eq!(config.tracker.interval_secs, 300);
        assert_eq!(config.tracker.retry_secs, 60);
        assert_eq!(config.tracker.fund_delay_ms, 1000);
        assert_eq!(config.backtest.days, 30);
        assert_eq!(config.http_timeout_secs, 10);
        assert!(config.data_path.is_none());
        assert_eq!(
            config.providers.sina.unwrap().base_url,
            "https://hq.sinajs.cn"
        );
    }

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
providers:
  eastmoney:
    fund_base_url: "http://example.com/fund"
    estimate_base_url: "http://example.com/gz"
    f10_base_url: "http://example.com/f10"
    kline_base_url: "http://example.com/kline"
  sina:
    base_url: "http://example.com/sina"
tracker:
  interval_secs: 120
backtest:
  days: 20
data_path: "/tmp/navcast"
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).unwrap();
        let eastmoney = config.providers.eastmoney.as_ref().unwrap();
        assert_eq!(eastmoney.kline_base_url, "http://example.com/kline");
        assert_eq!(eastmoney.quote_base_url, "https://push2.eastmoney.com");
        assert_eq!(
            config.providers.sina.as_ref().unwrap().base_url,
            "http://example.com/sina"
        );
        assert_eq!(config.tracker.interval_secs, 120);
        assert_eq!(config.tracker.retry_secs, 60);
        assert_eq!(config.backtest.days, 20);
        assert_eq!(
            config.default_data_path().unwrap(),
            PathBuf::from("/tmp/navcast")
        );
    }
}
