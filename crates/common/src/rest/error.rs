use http::StatusCode;

use crate::codec::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid request header: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
    #[error("{op}: expected status {expected} but received {status}: {body}")]
    Status {
        op: &'static str,
        expected: StatusCode,
        status: StatusCode,
        body: String,
        /// The response told the limiter how long to hold off
        wait_hinted: bool,
    },
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("{op}: gave up after {attempts} attempts, last status {status}")]
    RetriesExhausted {
        op: &'static str,
        attempts: u32,
        status: StatusCode,
    },
}

impl RestError {
    /// Whether the operation failed on the remote platform's side
    ///  in a way that retrying might fix
    pub fn is_transient(&self) -> bool {
        matches!(self, RestError::Status { status, .. } if is_transient(*status))
    }
}

/// 429 and 5xx are retried, everything else is final
pub fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
