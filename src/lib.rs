//! trust-tls - TLS connection factory with a pluggable trust policy
//!
//! This crate produces ready-to-use TLS client streams over TCP while letting
//! the caller decide how the peer's certificate chain is judged. The shipped
//! policy, [`AcceptAll`], approves every chain; it exists for directory
//! services running on self-signed or otherwise unmanaged certificates.
//!
//! # Examples
//!
//! ```no_run
//! use std::io::{Read, Write};
//!
//! let factory = trust_tls::default_factory().unwrap();
//! let mut conn = factory.connect("ldap.example.test", 636).unwrap();
//! conn.write_all(b"hello").unwrap();
//!
//! let mut buf = [0u8; 5];
//! conn.read_exact(&mut buf).unwrap();
//! ```
//!
//! Protocols that start in the clear can negotiate TLS in-band:
//!
//! ```no_run
//! use std::net::TcpStream;
//!
//! let raw = TcpStream::connect("ldap.example.test:389").unwrap();
//! // ... StartTLS exchange on `raw` ...
//! let factory = trust_tls::new_factory().unwrap();
//! let _conn = factory.upgrade(&raw, "ldap.example.test", 389, true).unwrap();
//! ```

pub mod cert;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod factory;
pub mod policy;

#[cfg(test)]
mod testing;

pub use cert::CertInfo;
pub use config::{FactoryBuilder, TlsVersion};
pub use connection::{SessionInfo, TlsConnection};
pub use context::TlsContext;
pub use error::{FactoryError, VerificationError};
pub use factory::{default_factory, factory_identifier, new_factory, TlsConnectionFactory};
pub use policy::{accept_all, AcceptAll, Issuer, PeerRole, TrustPolicy};

/// Result type for factory operations
pub type Result<T> = std::result::Result<T, FactoryError>;
