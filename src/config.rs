use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_CONFIG_PATH: &str = "./config.yaml";
const DEFAULT_REFRESH_INTERVAL_MINUTES: u64 = 45;

pub fn config_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    env_optional("CLIMATE_AGENT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub influx: InfluxConfig,
    #[serde(default)]
    pub accuweather: Option<AccuWeatherConfig>,
    #[serde(default)]
    pub openweathermap: Option<OpenWeatherMapConfig>,
    #[serde(default, alias = "NWS", alias = "nws")]
    pub weathergov: Option<WeatherGovConfig>,
    #[serde(default)]
    pub ecobee: Option<EcobeeConfig>,
    #[serde(default)]
    pub nest: Option<NestConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    #[serde(default)]
    pub token: String,
}

/// Settings shared by every polled source.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Schedule {
    #[serde(default, alias = "enable")]
    pub enabled: bool,
    /// Poll interval in minutes.
    #[serde(default)]
    pub interval: u64,
}

impl Schedule {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.saturating_mul(60))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccuWeatherConfig {
    #[serde(flatten)]
    pub schedule: Schedule,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub location_key: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenWeatherMapConfig {
    #[serde(flatten)]
    pub schedule: Schedule,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub city_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherGovConfig {
    #[serde(flatten)]
    pub schedule: Schedule,
    #[serde(default)]
    pub station: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EcobeeConfig {
    #[serde(flatten)]
    pub schedule: Schedule,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NestConfig {
    #[serde(flatten)]
    pub schedule: Schedule,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
}

impl EcobeeConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval.saturating_mul(60))
    }
}

impl NestConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval.saturating_mul(60))
    }
}

fn default_refresh_interval() -> u64 {
    DEFAULT_REFRESH_INTERVAL_MINUTES
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let parsed = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        };
        let mut config =
            parsed.with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AgentConfig = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let config: AgentConfig = serde_json::from_str(contents)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = env_optional("CLIMATE_AGENT_INFLUX_URL") {
            self.influx.url = url;
        }
        if let Some(token) = env_optional("CLIMATE_AGENT_INFLUX_TOKEN") {
            self.influx.token = token;
        }
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(self.influx.url.trim())
            .with_context(|| format!("invalid influx url {:?}", self.influx.url))?;
        require("influx", "org", &self.influx.org)?;
        require("influx", "bucket", &self.influx.bucket)?;

        if let Some(cfg) = self.accuweather.as_ref().filter(|c| c.schedule.enabled) {
            require_interval("accuweather", &cfg.schedule)?;
            require("accuweather", "api_key", &cfg.api_key)?;
        }
        if let Some(cfg) = self.openweathermap.as_ref().filter(|c| c.schedule.enabled) {
            require_interval("openweathermap", &cfg.schedule)?;
            require("openweathermap", "app_id", &cfg.app_id)?;
        }
        if let Some(cfg) = self.weathergov.as_ref().filter(|c| c.schedule.enabled) {
            require_interval("weathergov", &cfg.schedule)?;
            require("weathergov", "station", &cfg.station)?;
        }
        if let Some(cfg) = self.ecobee.as_ref().filter(|c| c.schedule.enabled) {
            require_interval("ecobee", &cfg.schedule)?;
            require("ecobee", "api_key", &cfg.api_key)?;
            require("ecobee", "refresh_token", &cfg.refresh_token)?;
            if cfg.refresh_interval == 0 {
                bail!("ecobee.refresh_interval must be at least 1 minute");
            }
        }
        if let Some(cfg) = self.nest.as_ref().filter(|c| c.schedule.enabled) {
            require_interval("nest", &cfg.schedule)?;
            require("nest", "project_id", &cfg.project_id)?;
            require("nest", "client_id", &cfg.client_id)?;
            require("nest", "client_secret", &cfg.client_secret)?;
            require("nest", "refresh_token", &cfg.refresh_token)?;
            if cfg.refresh_interval == 0 {
                bail!("nest.refresh_interval must be at least 1 minute");
            }
        }
        Ok(())
    }

    /// Names of the sources that will be polled, in start order.
    pub fn enabled_sources(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.accuweather.as_ref().is_some_and(|c| c.schedule.enabled) {
            out.push("accuweather");
        }
        if self.openweathermap.as_ref().is_some_and(|c| c.schedule.enabled) {
            out.push("openweathermap");
        }
        if self.weathergov.as_ref().is_some_and(|c| c.schedule.enabled) {
            out.push("weathergov");
        }
        if self.ecobee.as_ref().is_some_and(|c| c.schedule.enabled) {
            out.push("ecobee");
        }
        if self.nest.as_ref().is_some_and(|c| c.schedule.enabled) {
            out.push("nest");
        }
        out
    }
}

fn require(section: &str, key: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{section}.{key} is required when {section} is enabled");
    }
    Ok(())
}

fn require_interval(section: &str, schedule: &Schedule) -> Result<()> {
    if schedule.interval == 0 {
        bail!("{section}.interval must be at least 1 minute");
    }
    Ok(())
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
