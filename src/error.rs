/// Failure of a single poll cycle. Never fatal to the agent loop.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response payload: {source}")]
    Decode {
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("vendor error {code}: {message}")]
    Vendor {
        code: i64,
        message: String,
        body: String,
    },

    #[error("no access token available")]
    NotAuthenticated,
}

impl PollError {
    pub fn is_decode(&self) -> bool {
        matches!(self, PollError::Decode { .. } | PollError::Vendor { .. })
    }

    /// Raw response body attached to the error, if any.
    pub fn body(&self) -> Option<&str> {
        match self {
            PollError::Status { body, .. }
            | PollError::Decode { body, .. }
            | PollError::Vendor { body, .. } => Some(body),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("write request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("write rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Failure to exchange a refresh token for an access token.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    #[error("token request failed: {0}")]
    Transport(String),

    #[error("token endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid token response: {0}")]
    Decode(String),

    #[error("token response did not include an access token")]
    MissingToken,
}

impl From<reqwest::Error> for CredentialError {
    fn from(err: reqwest::Error) -> Self {
        CredentialError::Transport(err.to_string())
    }
}
