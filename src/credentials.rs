//! Access-token lifecycle for OAuth-backed sources.
//!
//! The refresher task owns a [`CredentialPublisher`] and is the only writer.
//! The source's agent holds a [`CredentialReader`]. Values are swapped whole
//! through a `watch` channel, so a reader sees either the previous token or
//! the new one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{CredentialError, PollError};

#[derive(Debug, Clone, PartialEq)]
pub struct CredentialState {
    pub access_token: String,
    pub refreshed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthStatus {
    Unauthenticated,
    Authenticated(CredentialState),
    Failed {
        error: String,
        failed_at: DateTime<Utc>,
    },
}

pub fn credential_channel() -> (CredentialPublisher, CredentialReader) {
    let (tx, rx) = watch::channel(AuthStatus::Unauthenticated);
    (CredentialPublisher { tx }, CredentialReader { rx })
}

pub struct CredentialPublisher {
    tx: watch::Sender<AuthStatus>,
}

impl CredentialPublisher {
    pub fn publish(&self, access_token: String) {
        self.tx.send_replace(AuthStatus::Authenticated(CredentialState {
            access_token,
            refreshed_at: Utc::now(),
        }));
    }

    pub fn fail(&self, err: &CredentialError) {
        self.tx.send_replace(AuthStatus::Failed {
            error: err.to_string(),
            failed_at: Utc::now(),
        });
    }
}

#[derive(Clone)]
pub struct CredentialReader {
    rx: watch::Receiver<AuthStatus>,
}

impl CredentialReader {
    pub fn status(&self) -> AuthStatus {
        self.rx.borrow().clone()
    }

    pub fn access_token(&self) -> Result<String, PollError> {
        match &*self.rx.borrow() {
            AuthStatus::Authenticated(state) => Ok(state.access_token.clone()),
            _ => Err(PollError::NotAuthenticated),
        }
    }

    /// Waits until the first refresh has finished. Fails if it did not succeed.
    pub async fn wait_authenticated(&self) -> Result<(), PollError> {
        let mut rx = self.rx.clone();
        let status = rx
            .wait_for(|status| !matches!(status, AuthStatus::Unauthenticated))
            .await
            .map_err(|_| PollError::NotAuthenticated)?;
        match &*status {
            AuthStatus::Authenticated(_) => Ok(()),
            _ => Err(PollError::NotAuthenticated),
        }
    }
}

/// Vendor-specific refresh-token exchange.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    fn source(&self) -> &'static str;

    async fn exchange(&self) -> Result<String, CredentialError>;
}

pub struct CredentialRefresher {
    exchange: Box<dyn TokenExchange>,
    interval: Duration,
    publisher: CredentialPublisher,
}

impl CredentialRefresher {
    pub fn new(
        exchange: Box<dyn TokenExchange>,
        interval: Duration,
        publisher: CredentialPublisher,
    ) -> Self {
        Self {
            exchange,
            interval,
            publisher,
        }
    }

    pub fn source(&self) -> &'static str {
        self.exchange.source()
    }

    /// Refreshes immediately and then once per interval. Returns `Ok` when
    /// cancelled and `Err` on the first failed exchange, which leaves the
    /// published state at `Failed`.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), CredentialError> {
        let source = self.exchange.source();
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                result = self.exchange.exchange() => result,
            };
            match result {
                Ok(token) => {
                    self.publisher.publish(token);
                    info!(source, "refreshed access token");
                }
                Err(err) => {
                    error!(source, error = %err, "access token refresh failed");
                    self.publisher.fail(&err);
                    return Err(err);
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedExchange {
        calls: Arc<AtomicUsize>,
        fail_on: usize,
    }

    #[async_trait]
    impl TokenExchange for ScriptedExchange {
        fn source(&self) -> &'static str {
            "test"
        }

        async fn exchange(&self) -> Result<String, CredentialError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.fail_on {
                return Err(CredentialError::Status {
                    status: 400,
                    body: "invalid_grant".to_string(),
                });
            }
            Ok(format!("token-{call}"))
        }
    }

    #[tokio::test]
    async fn reader_starts_unauthenticated() {
        let (_publisher, reader) = credential_channel();
        assert_eq!(reader.status(), AuthStatus::Unauthenticated);
        assert!(matches!(
            reader.access_token(),
            Err(PollError::NotAuthenticated)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn refresher_publishes_each_interval_then_escalates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (publisher, reader) = credential_channel();
        let refresher = CredentialRefresher::new(
            Box::new(ScriptedExchange {
                calls: calls.clone(),
                fail_on: 3,
            }),
            Duration::from_secs(45 * 60),
            publisher,
        );
        let handle = tokio::spawn(refresher.run(CancellationToken::new()));

        reader.wait_authenticated().await.expect("first token");
        assert_eq!(reader.access_token().expect("token"), "token-1");

        tokio::time::sleep(Duration::from_secs(45 * 60 + 1)).await;
        assert_eq!(reader.access_token().expect("token"), "token-2");

        let result = handle.await.expect("join");
        assert!(matches!(result, Err(CredentialError::Status { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(reader.status(), AuthStatus::Failed { .. }));
        assert!(reader.access_token().is_err());
    }

    #[tokio::test]
    async fn wait_fails_when_first_refresh_fails() {
        let (publisher, reader) = credential_channel();
        let refresher = CredentialRefresher::new(
            Box::new(ScriptedExchange {
                calls: Arc::new(AtomicUsize::new(0)),
                fail_on: 1,
            }),
            Duration::from_secs(60),
            publisher,
        );
        let handle = tokio::spawn(refresher.run(CancellationToken::new()));
        assert!(reader.wait_authenticated().await.is_err());
        assert!(handle.await.expect("join").is_err());
    }

    #[tokio::test]
    async fn cancelled_refresher_returns_ok() {
        let (publisher, _reader) = credential_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let refresher = CredentialRefresher::new(
            Box::new(ScriptedExchange {
                calls: Arc::new(AtomicUsize::new(0)),
                fail_on: usize::MAX,
            }),
            Duration::from_secs(60),
            publisher,
        );
        assert!(refresher.run(cancel).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reads_never_observe_partial_tokens() {
        let (publisher, reader) = credential_channel();
        publisher.publish("00000000".repeat(16));

        let writer = tokio::spawn(async move {
            for i in 0..20_000u32 {
                publisher.publish(format!("{i:08}").repeat(16));
                if i % 64 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });

        let mut readers = Vec::new();
        for _ in 0..4 {
            let reader = reader.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..20_000 {
                    let token = reader.access_token().expect("token");
                    assert_eq!(token.len(), 128);
                    let chunk = &token[..8];
                    assert!(token.as_bytes().chunks(8).all(|c| c == chunk.as_bytes()));
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.expect("writer");
        for handle in readers {
            handle.await.expect("reader");
        }
    }
}
