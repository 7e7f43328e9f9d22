use thiserror::Error;

/// A scoreboard payload that could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not valid JSON, a required field is missing or has the
    /// wrong type, or two events in one payload share an id.
    #[error("malformed scoreboard payload: {0}")]
    Malformed(String),
}

/// A failed fetch-decode cycle. Carries the endpoint so log lines stay
/// attributable when several clients poll at once.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection failure or request timeout.
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        source: reqwest::Error,
    },

    /// The server answered with a non-2xx status.
    #[error("{url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// The body arrived but could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
