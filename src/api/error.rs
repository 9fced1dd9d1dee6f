use thiserror::Error;

/// Everything that can go wrong between opening a chat stream and its last chunk.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never got a response (refused, DNS, timeout before headers)
    #[error("could not reach Ollama at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// HTTP 404 from the chat endpoint
    #[error("{0}")]
    ModelNotFound(String),

    /// Any other non-success status
    #[error("Ollama returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Transport failure after the response started
    #[error("stream interrupted: {0}")]
    Stream(#[source] reqwest::Error),

    /// A line of the NDJSON body that is not a chat response
    #[error("malformed response chunk `{line}`: {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// An `{"error": ...}` object reported by the server
    #[error("{0}")]
    Server(String),
}

/// Coarse grouping of [`ApiError`] for logs and callers that want to branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Connectivity,
    Model,
    Protocol,
}

impl ApiError {
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Connect { .. } | Self::Stream(_) => FailureKind::Connectivity,
            Self::ModelNotFound(_) | Self::Status { .. } | Self::Server(_) => FailureKind::Model,
            Self::Decode { .. } => FailureKind::Protocol,
        }
    }
}
