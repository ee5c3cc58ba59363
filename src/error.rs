//! Engine error types
//!
//! One error enum for the whole request path. The variants mirror the stages
//! a request moves through: configuration, dialing, TLS, protocol framing,
//! raw IO and redirect handling. Callers that speak JSON receive these as a
//! single `{"error": "..."}` blob.

use thiserror::Error;

/// Error raised anywhere on the request path.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed JA3/Akamai text, bad URL, unknown proxy type.
    #[error("config error: {0}")]
    Config(String),

    /// TCP connect failure, proxy refusal, SOCKS5/CONNECT auth failure.
    #[error("dial error: {0}")]
    Dial(String),

    /// Handshake failure, certificate verification failure, spec application failure.
    #[error("tls error: {0}")]
    Tls(String),

    /// HTTP/2 frame or HPACK decode failure, GOAWAY/RST_STREAM, body over the cap.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Read/write after EOF, broken pipe, deadline exceeded.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Too many redirects or an invalid Location target.
    #[error("redirect error: {0}")]
    Redirect(String),
}

impl EngineError {
    /// Deadline-exceeded IO error, used by every suspension point.
    pub(crate) fn timeout(what: &str) -> Self {
        EngineError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("{} timed out", what),
        ))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
