use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::EcobeeConfig;
use crate::credentials::{CredentialReader, TokenExchange};
use crate::error::{CredentialError, PollError};
use crate::http::{decode, fetch_body, fetch_token_body};
use crate::metric::MetricPoint;
use crate::poller::Source;
use crate::services::ecobee_status::correlate_equipment;
use crate::units::ecobee_tenths_f_to_c;

pub const MEASUREMENT: &str = "ecobee";

const ECOBEE_API_BASE: &str = "https://api.ecobee.com";
const LAST_MODIFIED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// Exchanges the configured refresh token for an access token. Ecobee rotates
/// refresh tokens, so the latest one returned is used for the next exchange.
pub struct EcobeeTokenExchange {
    http: Client,
    api_key: String,
    refresh_token: Mutex<String>,
}

impl EcobeeTokenExchange {
    pub fn new(http: Client, config: &EcobeeConfig) -> Self {
        Self {
            http,
            api_key: config.api_key.clone(),
            refresh_token: Mutex::new(config.refresh_token.clone()),
        }
    }

    fn current_refresh_token(&self) -> String {
        match self.refresh_token.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store_refresh_token(&self, token: String) {
        match self.refresh_token.lock() {
            Ok(mut current) => *current = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}

#[async_trait]
impl TokenExchange for EcobeeTokenExchange {
    fn source(&self) -> &'static str {
        MEASUREMENT
    }

    async fn exchange(&self) -> Result<String, CredentialError> {
        let refresh_token = self.current_refresh_token();
        let request = self
            .http
            .post(format!("{ECOBEE_API_BASE}/token"))
            .query(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", self.api_key.as_str()),
            ]);
        let body = fetch_token_body(request).await?;
        let tokens: TokenResponse =
            serde_json::from_str(&body).map_err(|err| CredentialError::Decode(err.to_string()))?;
        if let Some(rotated) = tokens.refresh_token.filter(|t| !t.trim().is_empty()) {
            self.store_refresh_token(rotated);
        }
        tokens
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or(CredentialError::MissingToken)
    }
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    status: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThermostatList {
    #[serde(default)]
    thermostat_list: Vec<Thermostat>,
    status: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThermostatSummary {
    #[serde(default)]
    status_list: Vec<String>,
    status: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
struct Thermostat {
    identifier: String,
    #[serde(default)]
    name: String,
    runtime: Runtime,
    settings: Settings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Runtime {
    actual_humidity: i64,
    actual_temperature: i64,
    desired_cool: i64,
    desired_heat: i64,
    desired_humidity: i64,
    #[serde(default)]
    last_status_modified: Option<String>,
    raw_temperature: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Settings {
    hvac_mode: String,
}

fn check_status(status: Option<&ApiStatus>, body: &str) -> Result<(), PollError> {
    match status {
        Some(status) if status.code != 0 => Err(PollError::Vendor {
            code: status.code,
            message: status.message.clone(),
            body: body.to_string(),
        }),
        _ => Ok(()),
    }
}

pub fn decode_thermostats(body: &str) -> Result<ThermostatList, PollError> {
    let list: ThermostatList = decode(body)?;
    check_status(list.status.as_ref(), body)?;
    Ok(list)
}

pub fn decode_summary(body: &str) -> Result<ThermostatSummary, PollError> {
    let summary: ThermostatSummary = decode(body)?;
    check_status(summary.status.as_ref(), body)?;
    Ok(summary)
}

fn selection(include: &[&str]) -> String {
    let mut selection = json!({
        "selectionType": "registered",
        "selectionMatch": "",
    });
    for key in include {
        selection[*key] = json!(true);
    }
    json!({ "selection": selection }).to_string()
}

pub struct EcobeeSource {
    http: Client,
    config: EcobeeConfig,
    credentials: CredentialReader,
}

impl EcobeeSource {
    pub fn new(http: Client, config: EcobeeConfig, credentials: CredentialReader) -> Self {
        Self {
            http,
            config,
            credentials,
        }
    }

    async fn get(&self, path: &str, token: &str, include: &[&str]) -> Result<String, PollError> {
        let request = self
            .http
            .get(format!("{ECOBEE_API_BASE}/1/{path}"))
            .query(&[("format", "json"), ("json", selection(include).as_str())])
            .header(header::CONTENT_TYPE, "application/json")
            .bearer_auth(token);
        match fetch_body(request).await {
            Ok(body) => Ok(body),
            // Ecobee reports auth failures as an HTTP error with a status envelope.
            Err(PollError::Status { status, body }) => {
                if let Ok(StatusEnvelope {
                    status: Some(api_status),
                }) = serde_json::from_str::<StatusEnvelope>(&body)
                {
                    check_status(Some(&api_status), &body)?;
                }
                Err(PollError::Status { status, body })
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl Source for EcobeeSource {
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
        let thermostats = decode_thermostats(
            &self
                .get("thermostat", &token, &["includeRuntime", "includeSettings"])
                .await?,
        )?;
        let summary = decode_summary(
            &self
                .get("thermostatSummary", &token, &["includeEquipmentStatus"])
                .await?,
        )?;
        Ok(normalize(&thermostats, &summary, Utc::now()))
    }
}

/// Builds one point per thermostat. Equipment indicators come from the
/// summary joined by identifier; setpoints are only emitted for the HVAC
/// modes that use them.
pub fn normalize(
    thermostats: &ThermostatList,
    summary: &ThermostatSummary,
    fetched_at: DateTime<Utc>,
) -> Vec<MetricPoint> {
    let statuses = correlate_equipment(
        thermostats
            .thermostat_list
            .iter()
            .map(|t| t.identifier.as_str()),
        &summary.status_list,
    );

    let mut points = Vec::with_capacity(thermostats.thermostat_list.len());
    for thermostat in &thermostats.thermostat_list {
        let runtime = &thermostat.runtime;
        let timestamp = runtime
            .last_status_modified
            .as_deref()
            .and_then(|raw| NaiveDateTime::parse_from_str(raw.trim(), LAST_MODIFIED_FORMAT).ok())
            .map(|naive| naive.and_utc())
            .unwrap_or(fetched_at);

        let mut builder = MetricPoint::builder(MEASUREMENT, timestamp)
            .tag("name", thermostat.name.as_str())
            .tag("identifier", thermostat.identifier.as_str());

        if let Some(status) = statuses.get(&thermostat.identifier) {
            for (name, running) in status.indicators() {
                builder = builder.field_i64(name, running);
            }
        }

        builder = builder
            .field_i64("humidity", runtime.actual_humidity)
            .field_i64("desiredHumidity", runtime.desired_humidity)
            .field_f64("temperature", ecobee_tenths_f_to_c(runtime.actual_temperature))
            .field_f64("rawTemperature", ecobee_tenths_f_to_c(runtime.raw_temperature));

        let mode = thermostat.settings.hvac_mode.as_str();
        if matches!(mode, "heat" | "auto" | "auxHeatOnly") {
            builder = builder.field_f64("heat", ecobee_tenths_f_to_c(runtime.desired_heat));
        }
        if matches!(mode, "cool" | "auto") {
            builder = builder.field_f64("cool", ecobee_tenths_f_to_c(runtime.desired_cool));
        }

        if let Some(point) = builder.build() {
            points.push(point);
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::FieldValue;
    use crate::services::ecobee_status::Equipment;
    use chrono::TimeZone;

    fn thermostat(id: &str, mode: &str) -> String {
        format!(
            r#"{{
                "identifier": "{id}",
                "name": "Thermostat {id}",
                "runtime": {{
                    "connected": true,
                    "actualTemperature": 716,
                    "actualHumidity": 41,
                    "rawTemperature": 713,
                    "desiredHeat": 680,
                    "desiredCool": 770,
                    "desiredHumidity": 36,
                    "lastStatusModified": "2024-03-02 14:31:07"
                }},
                "settings": {{"hvacMode": "{mode}"}}
            }}"#
        )
    }

    fn list(entries: &[String]) -> ThermostatList {
        let raw = format!(
            r#"{{"page": {{"page": 1, "totalPages": 1}}, "thermostatList": [{}], "status": {{"code": 0, "message": ""}}}}"#,
            entries.join(",")
        );
        decode_thermostats(&raw).expect("thermostats")
    }

    fn summary(entries: &[&str]) -> ThermostatSummary {
        let raw = serde_json::json!({
            "thermostatCount": entries.len(),
            "statusList": entries,
            "status": {"code": 0, "message": ""},
        })
        .to_string();
        decode_summary(&raw).expect("summary")
    }

    fn fetched_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 2, 15, 0, 0).unwrap()
    }

    fn float(point: &MetricPoint, key: &str) -> f64 {
        point.field(key).expect(key).as_f64()
    }

    #[test]
    fn converts_temperatures_with_tenths_scale() {
        let points = normalize(
            &list(&[thermostat("A", "heat")]),
            &summary(&["A:"]),
            fetched_at(),
        );
        assert_eq!(points.len(), 1);
        let point = &points[0];

        assert_eq!(point.measurement(), "ecobee");
        assert_eq!(point.tag("identifier"), Some("A"));
        assert_eq!(point.tag("name"), Some("Thermostat A"));
        assert_eq!(float(point, "temperature"), (716.0 - 320.0) * 5.0 / 90.0);
        assert_eq!(float(point, "rawTemperature"), (713.0 - 320.0) * 5.0 / 90.0);
        assert_eq!(float(point, "heat"), (680.0 - 320.0) * 5.0 / 90.0);
        assert_eq!(point.field("humidity"), Some(FieldValue::Integer(41)));
        assert_eq!(point.field("desiredHumidity"), Some(FieldValue::Integer(36)));
        assert_eq!(
            point.timestamp(),
            Utc.with_ymd_and_hms(2024, 3, 2, 14, 31, 7).unwrap()
        );
    }

    #[test]
    fn setpoints_follow_hvac_mode() {
        let points = normalize(
            &list(&[
                thermostat("auto", "auto"),
                thermostat("off", "off"),
                thermostat("cool", "cool"),
                thermostat("aux", "auxHeatOnly"),
            ]),
            &summary(&[]),
            fetched_at(),
        );
        let by_id = |id: &str| {
            points
                .iter()
                .find(|p| p.tag("identifier") == Some(id))
                .expect("point")
        };

        let auto = by_id("auto");
        assert!(auto.field("heat").is_some());
        assert!(auto.field("cool").is_some());

        let off = by_id("off");
        assert!(off.field("heat").is_none());
        assert!(off.field("cool").is_none());

        let cool = by_id("cool");
        assert!(cool.field("heat").is_none());
        assert_eq!(float(cool, "cool"), (770.0 - 320.0) * 5.0 / 90.0);

        let aux = by_id("aux");
        assert!(aux.field("heat").is_some());
        assert!(aux.field("cool").is_none());
    }

    #[test]
    fn equipment_indicators_are_joined_by_identifier() {
        let points = normalize(
            &list(&[thermostat("A", "heat"), thermostat("B", "heat")]),
            &summary(&["A:fan,auxHeat1", "B:"]),
            fetched_at(),
        );
        let a = &points[0];
        let b = &points[1];
        for equipment in Equipment::ALL {
            let expected_a = i64::from(matches!(equipment, Equipment::Fan | Equipment::AuxHeat1));
            assert_eq!(
                a.field(equipment.as_str()),
                Some(FieldValue::Integer(expected_a))
            );
            assert_eq!(b.field(equipment.as_str()), Some(FieldValue::Integer(0)));
        }
    }

    #[test]
    fn unparseable_last_modified_uses_fetch_time() {
        let raw = thermostat("A", "off").replace("2024-03-02 14:31:07", "");
        let points = normalize(&list(&[raw]), &summary(&[]), fetched_at());
        assert_eq!(points[0].timestamp(), fetched_at());
    }

    #[test]
    fn vendor_status_code_is_an_error() {
        let raw = r#"{"status": {"code": 14, "message": "Authentication token has expired. Refresh your tokens."}}"#;
        let err = decode_thermostats(raw).expect_err("expired token");
        assert!(matches!(err, PollError::Vendor { code: 14, .. }));
        assert!(err.is_decode());
        assert_eq!(err.body(), Some(raw));
    }

    #[test]
    fn selection_query_is_registered_thermostats() {
        let parsed: serde_json::Value =
            serde_json::from_str(&selection(&["includeEquipmentStatus"])).expect("json");
        assert_eq!(parsed["selection"]["selectionType"], "registered");
        assert_eq!(parsed["selection"]["selectionMatch"], "");
        assert_eq!(parsed["selection"]["includeEquipmentStatus"], true);
    }

    #[test]
    fn normalizing_twice_is_identical() {
        let thermostats = list(&[thermostat("A", "auto")]);
        let status = summary(&["A:compCool1,fan"]);
        assert_eq!(
            normalize(&thermostats, &status, fetched_at()),
            normalize(&thermostats, &status, fetched_at())
        );
    }
}
