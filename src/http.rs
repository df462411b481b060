use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::{CredentialError, PollError};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Builds the client shared by every agent, refresher and the sink.
pub fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build HTTP client")
}

/// Sends the request and returns the body of a 2xx response.
pub async fn fetch_body(request: RequestBuilder) -> Result<String, PollError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(PollError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

pub fn decode<T: DeserializeOwned>(body: &str) -> Result<T, PollError> {
    serde_json::from_str(body).map_err(|source| PollError::Decode {
        body: body.to_string(),
        source,
    })
}

pub async fn fetch_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, PollError> {
    let body = fetch_body(request).await?;
    decode(&body)
}

/// Sends an OAuth token request and returns the body of a 2xx response.
pub async fn fetch_token_body(request: RequestBuilder) -> Result<String, CredentialError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(CredentialError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}
