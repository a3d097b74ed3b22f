//! Error taxonomy for the diagnostic client.
//!
//! One variant per kind named in the spec; each carries whatever payload the
//! caller needs to produce an actionable message. `Result<T>` in the rest of
//! the crate is always `Result<T, Error>`.

use std::io;

/// Errors produced while probing an endpoint.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// TCP or implicit-TLS connect failed (DNS, refused, timeout, cert).
    #[error("could not connect: {message}")]
    ConnectFailure {
        message: String,
        /// OS errno or TLS library code, when one is available.
        code: Option<i32>,
    },

    /// STARTTLS refused, missing, or handshake failed.
    #[error("TLS negotiation failed: {detail}")]
    CryptoFailure { detail: String },

    /// No 220 greeting, or a greeting with an unexpected code.
    #[error("server greeting failure (code {code:?}): {}", .lines.join("; "))]
    ServerGreetingFailure { code: Option<u16>, lines: Vec<String> },

    /// EHLO/HELO rejected or malformed.
    #[error("client greeting failure (code {code:?}): {}", .lines.join("; "))]
    ClientGreetingFailure { code: Option<u16>, lines: Vec<String> },

    /// Transport read failed, including read timeout.
    #[error("read failed: {0}")]
    ReadFailure(String),

    /// Transport write failed, including write timeout.
    #[error("write failed: {0}")]
    WriteFailure(String),

    /// Valid I/O but an unexpected reply code.
    #[error("protocol failure (code {code:?}): {}", .lines.join("; "))]
    ProtocolFailure { code: Option<u16>, lines: Vec<String> },

    /// Server rejected credentials, unsupported mechanism, or invalid AUTH response.
    #[error("authentication failed: {reason}")]
    AuthenticationFailure {
        reason: String,
        code: Option<u16>,
        lines: Vec<String>,
    },

    /// SASL state machine misused: duplicate challenge, unknown prompt, empty challenge.
    #[error("SASL mechanism misuse: {0}")]
    MechanismMisuse(String),

    /// Bad host literal, bad port, bad sender address, or other caller-supplied input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Bad internal state: wrong stream context, double connect, use-after-close.
    #[error("domain error: {0}")]
    DomainError(String),
}

impl Error {
    pub fn connect(message: impl Into<String>, code: Option<i32>) -> Error {
        Error::ConnectFailure {
            message: message.into(),
            code,
        }
    }

    pub fn crypto(detail: impl Into<String>) -> Error {
        Error::CryptoFailure {
            detail: detail.into(),
        }
    }

    pub fn invalid_argument(detail: impl Into<String>) -> Error {
        Error::InvalidArgument(detail.into())
    }

    pub fn domain(detail: impl Into<String>) -> Error {
        Error::DomainError(detail.into())
    }

    /// The `no_valid_reply` condition spec.md §4.2 names: the stream ended
    /// before any well-formed reply line terminated it. `lines` carries
    /// whatever continuation lines had already been parsed when the
    /// connection closed (often empty).
    pub fn no_valid_reply(lines: Vec<String>) -> Error {
        Error::ProtocolFailure { code: None, lines }
    }

    /// True for kinds the spec says must end the Session (any I/O or protocol failure).
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Error::ConnectFailure { .. }
                | Error::CryptoFailure { .. }
                | Error::ServerGreetingFailure { .. }
                | Error::ClientGreetingFailure { .. }
                | Error::ReadFailure(_)
                | Error::WriteFailure(_)
                | Error::ProtocolFailure { .. }
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        // Most io::Error sites in this crate are reads; writers wrap explicitly
        // with Error::WriteFailure where the call site knows the direction.
        Error::ReadFailure(err.to_string())
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Error {
        Error::crypto(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
