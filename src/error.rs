//! Error types for the NEKO transport.

use thiserror::Error;

use crate::transport::ReplayAction;

/// Result type alias for NEKO operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during NEKO operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (PSK length, unsupported cipher, invalid port)
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Server handshake scan exhausted all candidate windows
    #[error("handshake failed")]
    HandshakeFailed,

    /// Cryptographic operation failed on the encode path
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// The inbound record stream ended. Raised for a clean peer close and for
    /// any decode failure (AEAD reject, sequence mismatch, bad inner length):
    /// a decoder never distinguishes those on the wire surface.
    #[error("end of stream")]
    Eof,

    /// The replay filter refused a record; carries the counter-behaviour the
    /// server should exhibit instead of an ordinary error.
    #[error("replay detected")]
    ReplayDetected(ReplayAction),

    /// Outbound sequence counter reached the per-session frame limit
    #[error("session frame limit reached")]
    FramesExhausted,

    /// Target address missing or unparseable
    #[error("invalid target address")]
    TargetInvalid,

    /// Write attempted on a closed or replay-poisoned stream
    #[error("connection is closed")]
    ClosedPipe,

    /// Network I/O error
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new cryptographic error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }

    /// Check if this error means the stream is simply over.
    pub fn is_eof(&self) -> bool {
        match self {
            Error::Eof => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }

    /// The replay action attached to this error, if any.
    pub fn replay_action(&self) -> Option<ReplayAction> {
        match self {
            Error::ReplayDetected(action) => Some(*action),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::HandshakeFailed;
        assert_eq!(err.to_string(), "handshake failed");

        let err = Error::Config("psk is empty".into());
        assert_eq!(err.to_string(), "invalid configuration: psk is empty");
    }

    #[test]
    fn test_eof_predicate() {
        assert!(Error::Eof.is_eof());
        assert!(Error::Io(std::io::ErrorKind::UnexpectedEof.into()).is_eof());
        assert!(!Error::HandshakeFailed.is_eof());
    }

    #[test]
    fn test_replay_action_accessor() {
        let err = Error::ReplayDetected(ReplayAction::Fallback);
        assert_eq!(err.replay_action(), Some(ReplayAction::Fallback));
        assert_eq!(Error::Eof.replay_action(), None);
    }
}
