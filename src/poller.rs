use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PollError;
use crate::metric::MetricPoint;
use crate::sink::MetricSink;

/// One vendor endpoint polled on a fixed interval.
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// Resolves once the source can issue its first request.
    async fn ready(&self) -> Result<(), PollError> {
        Ok(())
    }

    /// Fetches and normalizes one observation cycle.
    async fn poll(&self) -> Result<Vec<MetricPoint>, PollError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Written { written: usize, failed: usize },
    NoData,
    FetchFailed,
    DecodeFailed,
}

pub async fn run_cycle(source: &dyn Source, sink: &dyn MetricSink) -> CycleOutcome {
    let name = source.name();
    let points = match source.poll().await {
        Ok(points) => points,
        Err(PollError::Vendor {
            code,
            message,
            body,
        }) => {
            warn!(
                source = name,
                code,
                message = %message,
                body = %body,
                "vendor rejected request"
            );
            return CycleOutcome::DecodeFailed;
        }
        Err(err) if err.is_decode() => {
            warn!(
                source = name,
                error = %err,
                body = err.body().unwrap_or_default(),
                "could not decode response"
            );
            return CycleOutcome::DecodeFailed;
        }
        Err(err) => {
            warn!(source = name, error = %err, "fetch failed");
            return CycleOutcome::FetchFailed;
        }
    };

    if points.is_empty() {
        info!(source = name, "no data this cycle");
        return CycleOutcome::NoData;
    }

    let mut written = 0;
    let mut failed = 0;
    for point in &points {
        match sink.write_point(point).await {
            Ok(()) => written += 1,
            Err(err) => {
                failed += 1;
                warn!(
                    source = name,
                    measurement = point.measurement(),
                    error = %err,
                    "could not write data point"
                );
            }
        }
    }
    info!(source = name, written, failed, "wrote metrics");
    CycleOutcome::Written { written, failed }
}

pub struct PollingAgent {
    source: Arc<dyn Source>,
    sink: Arc<dyn MetricSink>,
}

impl PollingAgent {
    pub fn new(source: Arc<dyn Source>, sink: Arc<dyn MetricSink>) -> Self {
        Self { source, sink }
    }

    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Polls until cancelled. Cycles never overlap: the interval sleep starts
    /// after the previous cycle has finished writing.
    pub async fn run(self, cancel: CancellationToken) {
        let name = self.source.name();
        let interval = self.source.interval();

        let ready = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            ready = self.source.ready() => ready,
        };
        if let Err(err) = ready {
            error!(source = name, error = %err, "source never became ready; agent stopped");
            return;
        }
        info!(source = name, interval_secs = interval.as_secs(), "agent started");

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = run_cycle(self.source.as_ref(), self.sink.as_ref()) => outcome,
            };
            debug!(source = name, ?outcome, "cycle finished");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!(source = name, "agent stopped");
    }
}
