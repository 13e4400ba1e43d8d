//! Factory and verification errors

use crate::policy::PeerRole;
use std::net::SocketAddr;

/// Errors produced while building a factory or opening a connection
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    /// The TLS context could not be built. Indicates a broken environment.
    #[error("TLS context initialization failed: {0}")]
    Initialization(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to resolve {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind local address {local}: {source}")]
    Bind {
        local: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS handshake with {peer} failed: {source}")]
    Handshake {
        peer: String,
        #[source]
        source: openssl::ssl::Error,
    },
}

impl FactoryError {
    /// Whether this error came from the network layer (resolution, bind or connect)
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            FactoryError::Resolution { .. } | FactoryError::Connect { .. } | FactoryError::Bind { .. }
        )
    }

    /// Whether this error came from TLS negotiation
    pub fn is_handshake(&self) -> bool {
        matches!(self, FactoryError::Handshake { .. })
    }
}

/// A trust policy refused the presented certificate chain
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("certificate chain of {role} peer rejected: {reason}")]
pub struct VerificationError {
    pub role: PeerRole,
    pub reason: String,
}

impl VerificationError {
    pub fn new(role: PeerRole, reason: impl Into<String>) -> Self {
        VerificationError {
            role,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_categories() {
        let err = FactoryError::Connect {
            addr: "127.0.0.1:636".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(err.is_network());
        assert!(!err.is_handshake());

        let err = FactoryError::InvalidConfig("bad cipher".to_string());
        assert!(!err.is_network());
    }

    #[test]
    fn test_verification_error_display() {
        let err = VerificationError::new(PeerRole::Server, "expired");
        assert_eq!(err.to_string(), "certificate chain of server peer rejected: expired");
    }

    #[test]
    fn test_bind_error_display() {
        let err = FactoryError::Bind {
            local: "10.255.255.1:0".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::AddrNotAvailable),
        };
        assert!(err.to_string().starts_with("Failed to bind local address 10.255.255.1:0"));
    }
}
