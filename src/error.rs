use crate::timing::Timestamp;
use std::path::PathBuf;
use std::time::Duration;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while measuring requests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request could not be built. Nothing touched the network.
    #[error("invalid request: {0}")]
    Construction(#[from] ConstructionError),

    /// DNS, connect, TLS or HTTP protocol failure.
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: BoxError,
    },

    /// The configured timeout elapsed before the connection closed.
    #[error("request timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    /// The response could not be written to the output file.
    #[error("failed to write output file {}: {source}", .path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Averaging was requested over runs that ended with different status codes.
    #[error("cannot average runs with different status codes: {}", join_codes(.codes))]
    Consistency { codes: Vec<u16> },

    /// A timestamp was subtracted from an earlier one.
    #[error("timestamp {end} precedes {start}")]
    NegativeDuration { start: Timestamp, end: Timestamp },
}

impl Error {
    pub fn transport(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Transport {
            context: context.into(),
            source: source.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    #[error("HTTP/2 requires https, got '{scheme}'")]
    InsecureScheme { scheme: String },

    #[error("invalid http method '{0}'")]
    InvalidMethod(String),

    #[error("invalid header '{name}'")]
    InvalidHeader { name: String },

    #[error("unsupported http version '{0}', expected 1.0, 1.1 or 2.0")]
    UnsupportedVersion(String),

    #[error("request count must be at least 1")]
    ZeroRequests,

    #[error("no results to average")]
    NoRuns,

    #[error("tls setup failed: {0}")]
    Tls(String),
}

fn join_codes(codes: &[u16]) -> String {
    codes
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
