use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::NestConfig;
use crate::credentials::{CredentialReader, TokenExchange};
use crate::error::{CredentialError, PollError};
use crate::http::{fetch_json, fetch_token_body};
use crate::metric::MetricPoint;
use crate::poller::Source;

pub const MEASUREMENT: &str = "nest";

const GOOGLE_TOKEN_URL: &str = "https://www.googleapis.com/oauth2/v4/token";
const SDM_API_BASE: &str = "https://smartdevicemanagement.googleapis.com/v1";
const THERMOSTAT_TYPE: &str = "sdm.devices.types.THERMOSTAT";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

pub struct NestTokenExchange {
    http: Client,
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

impl NestTokenExchange {
    pub fn new(http: Client, config: &NestConfig) -> Self {
        Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            refresh_token: config.refresh_token.clone(),
        }
    }
}

#[async_trait]
impl TokenExchange for NestTokenExchange {
    fn source(&self) -> &'static str {
        MEASUREMENT
    }

    async fn exchange(&self) -> Result<String, CredentialError> {
        let request = self.http.post(GOOGLE_TOKEN_URL).form(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", self.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ]);
        let body = fetch_token_body(request).await?;
        let tokens: TokenResponse =
            serde_json::from_str(&body).map_err(|err| CredentialError::Decode(err.to_string()))?;
        tokens
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or(CredentialError::MissingToken)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceList {
    #[serde(default)]
    devices: Vec<Device>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Device {
    name: String,
    #[serde(rename = "type")]
    device_type: String,
    #[serde(default)]
    traits: Traits,
    #[serde(default)]
    parent_relations: Vec<ParentRelation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParentRelation {
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct Traits {
    #[serde(rename = "sdm.devices.traits.Info")]
    info: Option<Info>,
    #[serde(rename = "sdm.devices.traits.Temperature")]
    temperature: Option<Temperature>,
    #[serde(rename = "sdm.devices.traits.Humidity")]
    humidity: Option<Humidity>,
    #[serde(rename = "sdm.devices.traits.ThermostatMode")]
    mode: Option<ThermostatMode>,
    #[serde(rename = "sdm.devices.traits.ThermostatTemperatureSetpoint")]
    setpoint: Option<Setpoint>,
    #[serde(rename = "sdm.devices.traits.ThermostatHvac")]
    hvac: Option<Hvac>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Info {
    #[serde(default)]
    custom_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Temperature {
    ambient_temperature_celsius: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Humidity {
    ambient_humidity_percent: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ThermostatMode {
    #[serde(default)]
    mode: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Setpoint {
    heat_celsius: Option<f64>,
    cool_celsius: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Hvac {
    #[serde(default)]
    status: String,
}

impl Device {
    fn identifier(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    fn display_name(&self) -> &str {
        self.parent_relations
            .iter()
            .map(|relation| relation.display_name.trim())
            .find(|name| !name.is_empty())
            .or_else(|| self.traits.info.as_ref().map(|info| info.custom_name.trim()))
            .unwrap_or_default()
    }
}

pub struct NestSource {
    http: Client,
    config: NestConfig,
    credentials: CredentialReader,
}

impl NestSource {
    pub fn new(http: Client, config: NestConfig, credentials: CredentialReader) -> Self {
        Self {
            http,
            config,
            credentials,
        }
    }
}

#[async_trait]
impl Source for NestSource {
    fn name(&self) -> &'static str {
        MEASUREMENT
    }

    fn interval(&self) -> Duration {
        self.config.schedule.interval()
    }

    async fn ready(&self) -> Result<(), PollError> {
        self.credentials.wait_authenticated().await
    }

    async fn poll(&self) -> Result<Vec<MetricPoint>, PollError> {
        let token = self.credentials.access_token()?;
        let url = format!(
            "{SDM_API_BASE}/enterprises/{}/devices",
            self.config.project_id.trim()
        );
        let devices: DeviceList = fetch_json(self.http.get(url).bearer_auth(token)).await?;
        Ok(normalize(&devices, Utc::now()))
    }
}

/// One point per thermostat, stamped with the fetch time. Other device
/// types (cameras, doorbells) are skipped.
pub fn normalize(devices: &DeviceList, fetched_at: DateTime<Utc>) -> Vec<MetricPoint> {
    devices
        .devices
        .iter()
        .filter(|device| device.device_type == THERMOSTAT_TYPE)
        .filter_map(|device| {
            let traits = &device.traits;
            let mode = traits.mode.as_ref().map(|m| m.mode.as_str()).unwrap_or_default();
            let setpoint = traits.setpoint.as_ref();

            let mut builder = MetricPoint::builder(MEASUREMENT, fetched_at)
                .tag("identifier", device.identifier())
                .tag("name", device.display_name())
                .maybe_field_f64(
                    "temperature",
                    traits
                        .temperature
                        .as_ref()
                        .and_then(|t| t.ambient_temperature_celsius),
                )
                .maybe_field_f64(
                    "humidity",
                    traits
                        .humidity
                        .as_ref()
                        .and_then(|h| h.ambient_humidity_percent),
                );
            if matches!(mode, "HEAT" | "HEATCOOL") {
                builder = builder.maybe_field_f64("heat", setpoint.and_then(|s| s.heat_celsius));
            }
            if matches!(mode, "COOL" | "HEATCOOL") {
                builder = builder.maybe_field_f64("cool", setpoint.and_then(|s| s.cool_celsius));
            }
            if let Some(hvac) = &traits.hvac {
                builder = builder
                    .field_i64("heating", i64::from(hvac.status == "HEATING"))
                    .field_i64("cooling", i64::from(hvac.status == "COOLING"));
            }
            builder.build()
        })
        .collect()
}
