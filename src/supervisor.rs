use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AgentConfig;
use crate::credentials::{credential_channel, CredentialReader, CredentialRefresher, TokenExchange};
use crate::poller::{PollingAgent, Source};
use crate::services::accuweather::AccuWeatherSource;
use crate::services::ecobee::{EcobeeSource, EcobeeTokenExchange};
use crate::services::nest::{NestSource, NestTokenExchange};
use crate::services::openweathermap::OpenWeatherMapSource;
use crate::services::weathergov::WeatherGovSource;
use crate::sink::MetricSink;

/// Starts one polling agent per enabled source, plus a credential refresher
/// for the OAuth-backed ones.
pub struct AgentSupervisor {
    config: AgentConfig,
    http: Client,
    sink: Arc<dyn MetricSink>,
}

impl AgentSupervisor {
    pub fn new(config: AgentConfig, http: Client, sink: Arc<dyn MetricSink>) -> Self {
        Self { config, http, sink }
    }

    pub fn start(self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let enabled = self.config.enabled_sources();
        if enabled.is_empty() {
            info!("no sources enabled");
        } else {
            info!(sources = ?enabled, "starting agents");
        }

        let mut handles = Vec::new();
        let config = &self.config;

        if let Some(cfg) = config.accuweather.clone().filter(|c| c.schedule.enabled) {
            handles.push(self.spawn_agent(
                Arc::new(AccuWeatherSource::new(self.http.clone(), cfg)),
                &cancel,
            ));
        }
        if let Some(cfg) = config.openweathermap.clone().filter(|c| c.schedule.enabled) {
            handles.push(self.spawn_agent(
                Arc::new(OpenWeatherMapSource::new(self.http.clone(), cfg)),
                &cancel,
            ));
        }
        if let Some(cfg) = config.weathergov.clone().filter(|c| c.schedule.enabled) {
            handles.push(self.spawn_agent(
                Arc::new(WeatherGovSource::new(self.http.clone(), cfg)),
                &cancel,
            ));
        }
        if let Some(cfg) = config.ecobee.clone().filter(|c| c.schedule.enabled) {
            let exchange = EcobeeTokenExchange::new(self.http.clone(), &cfg);
            let refresh_interval = cfg.refresh_interval();
            let http = self.http.clone();
            handles.extend(self.spawn_authenticated(
                Box::new(exchange),
                refresh_interval,
                move |credentials| Arc::new(EcobeeSource::new(http, cfg, credentials)),
                &cancel,
            ));
        }
        if let Some(cfg) = config.nest.clone().filter(|c| c.schedule.enabled) {
            let exchange = NestTokenExchange::new(self.http.clone(), &cfg);
            let refresh_interval = cfg.refresh_interval();
            let http = self.http.clone();
            handles.extend(self.spawn_authenticated(
                Box::new(exchange),
                refresh_interval,
                move |credentials| Arc::new(NestSource::new(http, cfg, credentials)),
                &cancel,
            ));
        }

        handles
    }

    fn spawn_agent(&self, source: Arc<dyn Source>, cancel: &CancellationToken) -> JoinHandle<()> {
        PollingAgent::new(source, self.sink.clone()).start(cancel.clone())
    }

    fn spawn_authenticated<F>(
        &self,
        exchange: Box<dyn TokenExchange>,
        refresh_interval: Duration,
        build_source: F,
        cancel: &CancellationToken,
    ) -> [JoinHandle<()>; 2]
    where
        F: FnOnce(CredentialReader) -> Arc<dyn Source>,
    {
        let (publisher, reader) = credential_channel();
        let agent = self.spawn_agent(build_source(reader), cancel);
        let refresher = CredentialRefresher::new(exchange, refresh_interval, publisher);
        let monitor = tokio::spawn(supervise_refresher(
            refresher,
            agent.abort_handle(),
            cancel.clone(),
        ));
        [agent, monitor]
    }
}

/// Runs the refresher and stops the paired agent if it ever gives up.
/// Other sources keep running.
pub async fn supervise_refresher(
    refresher: CredentialRefresher,
    agent: AbortHandle,
    cancel: CancellationToken,
) {
    let source = refresher.source();
    if let Err(err) = refresher.run(cancel).await {
        error!(source, error = %err, "credential refresh failed; stopping source");
        agent.abort();
    }
}
