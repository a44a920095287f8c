use thiserror::Error;

/// Failure talking to the remote source.
///
/// Any of these aborts the running cycle; the cycle can be retried unchanged.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP status {status}")]
    Status { url: String, status: u16 },

    #[error("reading response from {url} failed: {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed payload from {url}: {source}")]
    Payload {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed line {line} from {url}: {source}")]
    MalformedLine {
        url: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("stream from {url} interrupted: {message}")]
    Interrupted { url: String, message: String },
}

impl TransportError {
    pub fn interrupted(url: impl Into<String>, message: impl Into<String>) -> Self {
        TransportError::Interrupted {
            url: url.into(),
            message: message.into(),
        }
    }

    /// URL of the failing request.
    pub fn url(&self) -> &str {
        match self {
            TransportError::Request { url, .. }
            | TransportError::Status { url, .. }
            | TransportError::Body { url, .. }
            | TransportError::Payload { url, .. }
            | TransportError::MalformedLine { url, .. }
            | TransportError::Interrupted { url, .. } => url,
        }
    }
}
