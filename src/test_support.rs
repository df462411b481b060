use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{PollError, SinkError};
use crate::metric::MetricPoint;
use crate::poller::Source;
use crate::sink::MetricSink;

pub fn sample_point(temperature: f64) -> MetricPoint {
    MetricPoint::builder("test", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        .tag("station", "TEST")
        .field_f64("temperature", temperature)
        .build()
        .expect("sample point has a field")
}

/// Sink that keeps every accepted point in memory.
#[derive(Default)]
pub struct RecordingSink {
    points: Mutex<Vec<MetricPoint>>,
    attempts: AtomicUsize,
    fail_attempts: HashSet<usize>,
}

impl RecordingSink {
    /// Rejects the writes at the given zero-based attempt indexes.
    pub fn failing_on(attempts: &[usize]) -> Self {
        Self {
            fail_attempts: attempts.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn points(&self) -> Vec<MetricPoint> {
        self.points.lock().expect("sink lock").clone()
    }
}

#[async_trait]
impl MetricSink for RecordingSink {
    async fn write_point(&self, point: &MetricPoint) -> Result<(), SinkError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_attempts.contains(&attempt) {
            return Err(SinkError::Rejected {
                status: 500,
                body: "unavailable".to_string(),
            });
        }
        self.points.lock().expect("sink lock").push(point.clone());
        Ok(())
    }
}

pub const VENDOR_ERROR_BODY: &str =
    r#"{"status": {"code": 14, "message": "Authentication token has expired."}}"#;

pub enum Step {
    Points(Vec<MetricPoint>),
    FetchError,
    TransportError,
    DecodeError,
    VendorError,
}

/// Source that replays a fixed script, one step per poll.
pub struct ScriptedSource {
    name: &'static str,
    interval: Duration,
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    ready: bool,
}

impl ScriptedSource {
    pub fn new(name: &'static str, interval: Duration, steps: Vec<Step>) -> Self {
        Self {
            name,
            interval,
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
            ready: true,
        }
    }

    pub fn never_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for ScriptedSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn ready(&self) -> Result<(), PollError> {
        if self.ready {
            Ok(())
        } else {
            Err(PollError::NotAuthenticated)
        }
    }

    async fn poll(&self) -> Result<Vec<MetricPoint>, PollError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().expect("script lock").pop_front();
        match step {
            Some(Step::Points(points)) => Ok(points),
            Some(Step::FetchError) => Err(PollError::Status {
                status: 503,
                body: "upstream unavailable".to_string(),
            }),
            Some(Step::TransportError) => {
                // Invalid URLs fail inside reqwest before any I/O.
                let err = reqwest::Client::new()
                    .get("not a url")
                    .send()
                    .await
                    .expect_err("invalid url");
                Err(PollError::Transport(err))
            }
            Some(Step::VendorError) => Err(PollError::Vendor {
                code: 14,
                message: "Authentication token has expired.".to_string(),
                body: VENDOR_ERROR_BODY.to_string(),
            }),
            Some(Step::DecodeError) => {
                crate::http::decode::<Vec<f64>>("<html>").map(|_| Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }
}
