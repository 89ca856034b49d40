//! Error types for threshold wallet sessions

use thiserror::Error;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running keygen or signing sessions
#[derive(Debug, Error)]
pub enum Error {
    /// A party failed while starting the protocol
    #[error("Protocol start failed for party {party}: {source}")]
    ProtocolStart {
        party: String,
        #[source]
        source: Box<Error>,
    },

    /// A party failed while processing an inbound message
    #[error("Protocol update failed for party {party}: {source}")]
    ProtocolUpdate {
        party: String,
        #[source]
        source: Box<Error>,
    },

    /// Failed to encode an outbound message
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No wallet is stored under the requested address
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    /// Malformed payload, bad configuration or missing required field
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A share, commitment or signature did not verify
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Parties finished with outputs that disagree
    #[error("Inconsistent output: {0}")]
    InconsistentOutput(String),

    /// Session deadline elapsed
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap an engine failure raised by `start()`.
    pub fn protocol_start(party: impl Into<String>, source: Error) -> Self {
        Error::ProtocolStart {
            party: party.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an engine failure raised while handling a delivery.
    pub fn protocol_update(party: impl Into<String>, source: Error) -> Self {
        Error::ProtocolUpdate {
            party: party.into(),
            source: Box::new(source),
        }
    }

    /// True for errors caused by the caller's request rather than the session.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_name_the_party() {
        let err = Error::protocol_update("2", Error::VerificationFailed("bad share".into()));
        let message = err.to_string();

        assert!(message.contains("party 2"));
        assert!(message.contains("bad share"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_invalid_input_is_distinct() {
        assert!(Error::InvalidInput("data".into()).is_invalid_input());
        assert!(!Error::WalletNotFound("0x00".into()).is_invalid_input());
        assert!(!Error::Internal("boom".into()).is_invalid_input());
    }
}
