use thiserror::Error;

/// A log line that could not be turned into a record.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed log line: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read log source: {0}")]
    Io(#[from] std::io::Error),
}

/// Rejected at the admin boundary before anything reaches the pipeline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("url must not be empty")]
    EmptyUrl,

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported url scheme '{scheme}'")]
    UnsupportedScheme { scheme: String },
}

/// Geo lookups are shared between every caller waiting on the same address,
/// so the error must be cheap to clone.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeoError {
    #[error("geo lookup timed out")]
    Timeout,

    #[error("geo request failed: {0}")]
    Http(String),

    #[error("geo provider rejected lookup: {0}")]
    Provider(String),
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request timed out")]
    Timeout,

    #[error("{0}")]
    Request(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout
        } else {
            ProbeError::Request(err.to_string())
        }
    }
}

impl From<reqwest::Error> for GeoError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GeoError::Timeout
        } else {
            GeoError::Http(err.to_string())
        }
    }
}
