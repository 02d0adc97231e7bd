//! Error types for the IMAP engine.

use std::time::Duration;

use thiserror::Error;

use crate::types::ResponseCode;

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Response syntax error. Aborts the current command only.
    #[error("Bad response syntax at position {position}: {message}")]
    BadSyntax {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Tagged NO response.
    #[error("Server returned NO: {text}")]
    No {
        /// Human-readable server text.
        text: String,
        /// Response code, if the server sent one.
        code: Option<ResponseCode>,
    },

    /// Tagged BAD response.
    #[error("Server returned BAD: {0}")]
    Bad(String),

    /// Server sent BYE; the connection is gone.
    #[error("Server sent BYE: {0}")]
    Bye(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Authentication failed after exhausting usable mechanisms.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The user cancelled an authentication prompt.
    #[error("Authentication cancelled by user")]
    AuthCancelled,

    /// Server answered NO with `[UNAVAILABLE]` during authentication.
    #[error("Server unavailable: {0}")]
    AuthUnavailable(String),

    /// The selected mechanism is not supported by this engine.
    #[error("Authentication mechanism not supported: {0}")]
    AuthMechNotSupported(String),

    /// No password source is available (no prompt window, empty store).
    #[error("No password available")]
    NoPassword,

    /// A `local-fetch-only` URL asked for a message not in the offline store.
    #[error("Message not available offline")]
    NotOffline,

    /// Operation requires a selected mailbox.
    #[error("No mailbox selected")]
    MailboxNotSelected,

    /// UIDVALIDITY changed under a UID-sensitive URL.
    #[error("UIDVALIDITY mismatch: expected {expected}, server reports {actual}")]
    UidValidityMismatch {
        /// Value the URL was built against.
        expected: u32,
        /// Value the server reported.
        actual: u32,
    },

    /// Process is shutting down; only expunge/delete URLs run.
    #[error("Shutting down")]
    Shutdown,

    /// The URL string could not be parsed.
    #[error("Malformed IMAP URL: {0}")]
    UrlSyntax(String),

    /// Protocol violation or unexpected data.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid state for the requested operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Returns true if the error indicates the connection itself is dead
    /// and a single URL retry on a fresh connection is worthwhile.
    #[must_use]
    pub fn is_retriable_drop(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            Self::Bye(_) => true,
            _ => false,
        }
    }

    /// Returns true if the error is fatal for the connection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Tls(_) | Self::Bye(_) | Self::Timeout(_) | Self::Shutdown
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_is_retriable() {
        let err = Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(err.is_retriable_drop());
        assert!(err.is_fatal());
    }

    #[test]
    fn no_is_not_fatal() {
        let err = Error::No {
            text: "nope".into(),
            code: None,
        };
        assert!(!err.is_fatal());
        assert!(!err.is_retriable_drop());
    }

    #[test]
    fn bye_is_both() {
        let err = Error::Bye("shutting down".into());
        assert!(err.is_fatal());
        assert!(err.is_retriable_drop());
    }
}
