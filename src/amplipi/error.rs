use thiserror::Error;

/// Failure talking to the AmpliPi controller.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection refused, DNS failure, timeout, ...
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The controller answered with a non-success status.
    #[error("Controller returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not the expected JSON document.
    #[error("Failed to decode controller response: {message}")]
    Decode { message: String, body: String },

    #[error("Invalid controller URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    /// Whether retrying the same call later might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Decode { .. } | Self::InvalidUrl(_) => false,
        }
    }
}
