use std::fmt::Display;
use tracing::debug;

#[derive(Debug, PartialEq)]
pub enum Error {
    MalformedChallenge(String),
    UpstreamTransport(String),
    InvalidUpstream(String),
    Internal(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::MalformedChallenge(header) => {
                write!(f, "invalid Www-Authenticate header: {header}")
            }
            Error::UpstreamTransport(s) => write!(f, "upstream unavailable: {s}"),
            Error::InvalidUpstream(s) => write!(f, "invalid upstream location: {s}"),
            Error::Internal(s) => write!(f, "internal server error: {s}"),
        }
    }
}

impl From<hyper::Error> for Error {
    fn from(error: hyper::Error) -> Self {
        debug!("Hyper error: {error:?}");
        Error::UpstreamTransport(error.to_string())
    }
}

impl From<hyper_util::client::legacy::Error> for Error {
    fn from(error: hyper_util::client::legacy::Error) -> Self {
        debug!("Upstream client error: {error:?}");
        Error::UpstreamTransport(error.to_string())
    }
}

impl From<hyper::http::Error> for Error {
    fn from(error: hyper::http::Error) -> Self {
        debug!("Hyper HTTP error: {error:?}");
        Error::Internal("HTTP error during operations".to_string())
    }
}

impl From<hyper::http::uri::InvalidUri> for Error {
    fn from(error: hyper::http::uri::InvalidUri) -> Self {
        debug!("Invalid URI: {error:?}");
        Error::InvalidUpstream(error.to_string())
    }
}

impl From<hyper::header::InvalidHeaderValue> for Error {
    fn from(error: hyper::header::InvalidHeaderValue) -> Self {
        debug!("Invalid header value: {error:?}");
        Error::Internal("Invalid header value".to_string())
    }
}

impl From<serde_urlencoded::ser::Error> for Error {
    fn from(error: serde_urlencoded::ser::Error) -> Self {
        debug!("Query serialization error: {error:?}");
        Error::Internal("Query serialization error".to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        debug!("Serde JSON error: {error:?}");
        Error::Internal("(De)Serialization error during operations".to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        debug!("I/O error: {error:?}");
        Error::Internal(format!("I/O error: {error}"))
    }
}
