use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::Deserialize;
use std::time::Duration;

use crate::config::WeatherGovConfig;
use crate::error::PollError;
use crate::http::fetch_json;
use crate::metric::MetricPoint;
use crate::poller::Source;
use crate::units::{nonzero, pa_to_hpa, positive};

pub const MEASUREMENT: &str = "weathergov";

const WEATHERGOV_API_BASE: &str = "https://api.weather.gov";

#[derive(Debug, Deserialize)]
pub struct Observation {
    properties: Properties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Properties {
    timestamp: Option<String>,
    #[serde(default)]
    temperature: Quantity,
    #[serde(default)]
    relative_humidity: Quantity,
    #[serde(default)]
    barometric_pressure: Quantity,
    #[serde(default)]
    wind_speed: Quantity,
}

/// A value tagged with its WMO unit code, e.g. `wmoUnit:Pa`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Quantity {
    value: Option<f64>,
    unit_code: Option<String>,
}

/// Barometric pressure in hPa. Values in an unexpected unit are dropped.
fn pressure_hpa(pressure: &Quantity) -> Option<f64> {
    let value = positive(pressure.value)?;
    match pressure.unit_code.as_deref() {
        None | Some("wmoUnit:Pa") => Some(pa_to_hpa(value)),
        Some("wmoUnit:hPa") => Some(value),
        Some(_) => None,
    }
}

pub struct WeatherGovSource {
    http: Client,
    config: WeatherGovConfig,
}

impl WeatherGovSource {
    pub fn new(http: Client, config: WeatherGovConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl Source for WeatherGovSource {
    fn name(&self) -> &'static str {
        MEASUREMENT
    }

    fn interval(&self) -> Duration {
        self.config.schedule.interval()
    }

    async fn poll(&self) -> Result<Vec<MetricPoint>, PollError> {
        let station = self.config.station.trim();
        let url = format!("{WEATHERGOV_API_BASE}/stations/{station}/observations/latest");
        let request = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/geo+json");
        let observation: Observation = fetch_json(request).await?;
        Ok(normalize(&observation, station, Utc::now())
            .into_iter()
            .collect())
    }
}

/// weather.gov reports 0 (or null) when a station has no reading. Temperature
/// is dropped only when exactly zero; humidity, pressure and wind speed are
/// dropped unless strictly positive. Pressure is converted from Pa to hPa
/// according to its unit code.
pub fn normalize(
    observation: &Observation,
    station: &str,
    fetched_at: DateTime<Utc>,
) -> Option<MetricPoint> {
    let props = &observation.properties;
    let timestamp = props
        .timestamp
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or(fetched_at);

    MetricPoint::builder(MEASUREMENT, timestamp)
        .tag("station", station.trim())
        .maybe_field_f64("temperature", nonzero(props.temperature.value))
        .maybe_field_f64("humidity", positive(props.relative_humidity.value))
        .maybe_field_f64("pressure", pressure_hpa(&props.barometric_pressure))
        .maybe_field_f64("windspeed", positive(props.wind_speed.value))
        .build()
}
