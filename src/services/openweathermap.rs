use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::OpenWeatherMapConfig;
use crate::error::PollError;
use crate::http::fetch_json;
use crate::metric::MetricPoint;
use crate::poller::Source;
use crate::units::mps_to_kmh;

pub const MEASUREMENT: &str = "openweathermap";

const OPENWEATHERMAP_API_BASE: &str = "https://api.openweathermap.org/data/2.5";

#[derive(Debug, Deserialize)]
pub struct CurrentWeather {
    #[serde(rename = "dt")]
    observed_at: Option<i64>,
    #[serde(rename = "name", default)]
    city: String,
    #[serde(default)]
    sys: Option<Sys>,
    main: MainBlock,
    #[serde(default)]
    wind: Option<WindBlock>,
}

#[derive(Debug, Deserialize)]
struct Sys {
    #[serde(default)]
    country: String,
}

#[derive(Debug, Deserialize)]
struct MainBlock {
    temp: Option<f64>,
    humidity: Option<i64>,
    pressure: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WindBlock {
    speed: Option<f64>,
}

pub struct OpenWeatherMapSource {
    http: Client,
    config: OpenWeatherMapConfig,
}

impl OpenWeatherMapSource {
    pub fn new(http: Client, config: OpenWeatherMapConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl Source for OpenWeatherMapSource {
    fn name(&self) -> &'static str {
        MEASUREMENT
    }

    fn interval(&self) -> Duration {
        self.config.schedule.interval()
    }

    async fn poll(&self) -> Result<Vec<MetricPoint>, PollError> {
        let city_id = self.config.city_id.to_string();
        let request = self
            .http
            .get(format!("{OPENWEATHERMAP_API_BASE}/weather"))
            .query(&[
                ("id", city_id.as_str()),
                ("appid", self.config.app_id.as_str()),
                ("units", "metric"),
            ]);
        let weather: CurrentWeather = fetch_json(request).await?;
        Ok(normalize(&weather, Utc::now()).into_iter().collect())
    }
}

/// Wind speed is reported in m/s and stored in km/h.
pub fn normalize(weather: &CurrentWeather, fetched_at: DateTime<Utc>) -> Option<MetricPoint> {
    let timestamp = weather
        .observed_at
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(fetched_at);
    let country = weather
        .sys
        .as_ref()
        .map(|sys| sys.country.as_str())
        .unwrap_or_default();

    let mut builder = MetricPoint::builder(MEASUREMENT, timestamp)
        .tag("city", weather.city.as_str())
        .tag("country", country)
        .maybe_field_f64("temperature", weather.main.temp)
        .maybe_field_f64(
            "windspeed",
            weather.wind.as_ref().and_then(|w| w.speed).map(mps_to_kmh),
        );
    if let Some(humidity) = weather.main.humidity {
        builder = builder.field_i64("humidity", humidity);
    }
    if let Some(pressure) = weather.main.pressure {
        builder = builder.field_i64("pressure", pressure);
    }
    builder.build()
}
