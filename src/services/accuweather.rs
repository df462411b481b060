use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::AccuWeatherConfig;
use crate::error::PollError;
use crate::http::{decode, fetch_body};
use crate::metric::MetricPoint;
use crate::poller::Source;

pub const MEASUREMENT: &str = "accuweather";

const ACCUWEATHER_API_BASE: &str = "https://dataservice.accuweather.com";

#[derive(Debug, Deserialize)]
pub struct CurrentConditions {
    #[serde(rename = "LocalObservationDateTime")]
    observed_at: Option<String>,
    #[serde(rename = "Temperature")]
    temperature: Option<UnitBranches>,
    #[serde(rename = "RelativeHumidity")]
    humidity: Option<i64>,
    #[serde(rename = "Pressure")]
    pressure: Option<UnitBranches>,
    #[serde(rename = "Wind")]
    wind: Option<Wind>,
}

#[derive(Debug, Deserialize)]
struct UnitBranches {
    #[serde(rename = "Metric")]
    metric: Option<Measured>,
}

#[derive(Debug, Deserialize)]
struct Measured {
    #[serde(rename = "Value")]
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Wind {
    #[serde(rename = "Speed")]
    speed: Option<UnitBranches>,
}

fn metric_value(branches: Option<&UnitBranches>) -> Option<f64> {
    branches?.metric.as_ref()?.value
}

pub struct AccuWeatherSource {
    http: Client,
    config: AccuWeatherConfig,
}

impl AccuWeatherSource {
    pub fn new(http: Client, config: AccuWeatherConfig) -> Self {
        Self { http, config }
    }

    fn url(&self) -> String {
        format!(
            "{ACCUWEATHER_API_BASE}/currentconditions/v1/{}",
            self.config.location_key
        )
    }
}

#[async_trait]
impl Source for AccuWeatherSource {
    fn name(&self) -> &'static str {
        MEASUREMENT
    }

    fn interval(&self) -> Duration {
        self.config.schedule.interval()
    }

    async fn poll(&self) -> Result<Vec<MetricPoint>, PollError> {
        let request = self.http.get(self.url()).query(&[
            ("apikey", self.config.api_key.as_str()),
            ("details", "true"),
        ]);
        let body = fetch_body(request).await?;
        let conditions: Vec<CurrentConditions> = decode(&body)?;
        Ok(normalize(&conditions, self.config.location_key, Utc::now())
            .into_iter()
            .collect())
    }
}

/// Only the first element of the response array is used. An empty array
/// yields no point.
pub fn normalize(
    conditions: &[CurrentConditions],
    location_key: u64,
    fetched_at: DateTime<Utc>,
) -> Option<MetricPoint> {
    let current = conditions.first()?;
    let timestamp = current
        .observed_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or(fetched_at);

    let mut builder = MetricPoint::builder(MEASUREMENT, timestamp)
        .tag("locationKey", location_key.to_string())
        .maybe_field_f64("temperature", metric_value(current.temperature.as_ref()))
        .maybe_field_f64("pressure", metric_value(current.pressure.as_ref()))
        .maybe_field_f64(
            "windspeed",
            metric_value(current.wind.as_ref().and_then(|w| w.speed.as_ref())),
        );
    if let Some(humidity) = current.humidity {
        builder = builder.field_i64("humidity", humidity);
    }
    builder.build()
}
