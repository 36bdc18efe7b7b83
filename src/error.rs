use thiserror::Error;

/// Errors returned by every core operation
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Malformed bencode
    #[error("parse error: {0}")]
    Parse(String),

    /// Decoded fine, but semantically invalid (wrong type, bad length, ...)
    #[error("validation error: {0}")]
    Validation(String),

    /// Connection or transport failure, including timeouts
    #[error("network error: {0}")]
    Network(String),

    /// Short handshake or info hash mismatch
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Peer sent a message that violates the expected exchange
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Assembled piece does not match its expected SHA1 hash
    #[error("integrity error: piece {index} hash mismatch (expected {expected}, got {actual})")]
    Integrity {
        index: u32,
        expected: String,
        actual: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Network(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_error_category() {
        let err = Error::Handshake("short read".to_string());
        assert_eq!(err.to_string(), "handshake error: short read");

        let err = Error::Integrity {
            index: 3,
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert!(err.to_string().starts_with("integrity error: piece 3"));
    }

    #[test]
    fn io_errors_become_network_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(Error::from(io), Error::Network(msg) if msg == "reset"));
    }
}
