use async_trait::async_trait;
use reqwest::{header, Client};
use url::Url;

use crate::config::InfluxConfig;
use crate::error::SinkError;
use crate::metric::MetricPoint;

/// Destination for normalized points. Implementations are shared by every
/// agent and must tolerate concurrent callers.
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn write_point(&self, point: &MetricPoint) -> Result<(), SinkError>;
}

/// Blocking-per-point writer for the InfluxDB v2 HTTP API, scoped to one
/// organization and bucket.
pub struct InfluxSink {
    http: Client,
    write_url: Url,
    token: String,
}

impl InfluxSink {
    pub fn new(http: Client, config: &InfluxConfig) -> anyhow::Result<Self> {
        let mut base = Url::parse(config.url.trim())?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let mut write_url = base.join("api/v2/write")?;
        write_url
            .query_pairs_mut()
            .append_pair("org", &config.org)
            .append_pair("bucket", &config.bucket)
            .append_pair("precision", "ns");
        Ok(Self {
            http,
            write_url,
            token: config.token.clone(),
        })
    }

    pub fn write_url(&self) -> &Url {
        &self.write_url
    }
}

#[async_trait]
impl MetricSink for InfluxSink {
    async fn write_point(&self, point: &MetricPoint) -> Result<(), SinkError> {
        let mut request = self
            .http
            .post(self.write_url.clone())
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(point.to_line_protocol());
        if !self.token.is_empty() {
            request = request.header(header::AUTHORIZATION, format!("Token {}", self.token));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
