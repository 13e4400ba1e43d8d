//! Factory configuration
//!
//! Everything about a factory is fixed when it is built. [`FactoryBuilder`]
//! collects the trust policy and protocol settings; [`FactoryBuilder::build`]
//! turns them into an immutable [`TlsConnectionFactory`].

use crate::context::TlsContext;
use crate::error::FactoryError;
use crate::factory::TlsConnectionFactory;
use crate::policy::{accept_all, TrustPolicy};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// TLS protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl FromStr for TlsVersion {
    type Err = FactoryError;

    /// Parse TLS version from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(FactoryError::InvalidConfig(format!("unknown TLS version: {}", s))),
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builder for [`TlsConnectionFactory`]
///
/// Unset options keep OpenSSL's defaults. The trust policy defaults to the
/// shared accept-all instance.
#[derive(Clone)]
pub struct FactoryBuilder {
    pub(crate) policy: Arc<dyn TrustPolicy>,
    pub(crate) min_version: Option<TlsVersion>,
    pub(crate) max_version: Option<TlsVersion>,
    pub(crate) cipher_list: Option<String>,
    pub(crate) ciphersuites: Option<String>,
}

impl FactoryBuilder {
    pub fn new() -> Self {
        FactoryBuilder {
            policy: accept_all(),
            min_version: None,
            max_version: None,
            cipher_list: None,
            ciphersuites: None,
        }
    }

    /// Set the trust policy consulted during every handshake
    pub fn policy(mut self, policy: Arc<dyn TrustPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.min_version = Some(min);
        self.max_version = Some(max);
        self
    }

    /// Set cipher list (for TLS <= 1.2), in OpenSSL cipher-string syntax
    pub fn cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.cipher_list = Some(ciphers.into());
        self
    }

    /// Set cipher suites (for TLS 1.3)
    pub fn ciphersuites(mut self, ciphers: impl Into<String>) -> Self {
        self.ciphersuites = Some(ciphers.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), FactoryError> {
        if let (Some(min), Some(max)) = (self.min_version, self.max_version) {
            if min > max {
                return Err(FactoryError::InvalidConfig(format!(
                    "minimum version {} is above maximum version {}",
                    min, max
                )));
            }
        }
        Ok(())
    }

    /// Build the factory. The TLS context is created here, eagerly.
    pub fn build(self) -> Result<TlsConnectionFactory, FactoryError> {
        let context = TlsContext::with_config(&self)?;
        Ok(TlsConnectionFactory::from_context(context))
    }
}

impl Default for FactoryBuilder {
    fn default() -> Self {
        FactoryBuilder::new()
    }
}

impl fmt::Debug for FactoryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryBuilder")
            .field("policy", &self.policy.name())
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .field("cipher_list", &self.cipher_list)
            .field("ciphersuites", &self.ciphersuites)
            .finish()
    }
}
