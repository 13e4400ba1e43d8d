//! The connection factory
//!
//! [`TlsConnectionFactory`] fixes a trust policy and otherwise forwards every
//! call, unchanged, to its [`TlsContext`]. Nothing here interprets hosts,
//! ports or addresses.
//!
//! Two ways to obtain an accept-all factory:
//!
//! - [`default_factory`] returns the process-wide shared instance
//! - [`new_factory`] builds an independent instance with its own context

use crate::config::FactoryBuilder;
use crate::connection::TlsConnection;
use crate::context::TlsContext;
use crate::error::FactoryError;
use crate::policy::TrustPolicy;
use crate::Result;
use openssl::error::ErrorStack;
use std::fmt;
use std::net::{IpAddr, TcpStream};
use std::sync::OnceLock;

/// Name under which this factory registers with directory client libraries
const FACTORY_IDENTIFIER: &str = concat!(module_path!(), "::TlsConnectionFactory");

static DEFAULT: OnceLock<std::result::Result<TlsConnectionFactory, ErrorStack>> = OnceLock::new();

/// Produces TLS client connections under one trust policy
///
/// A factory holds no per-connection state and can be shared across threads.
#[derive(Clone)]
pub struct TlsConnectionFactory {
    context: TlsContext,
}

impl TlsConnectionFactory {
    pub fn builder() -> FactoryBuilder {
        FactoryBuilder::new()
    }

    pub(crate) fn from_context(context: TlsContext) -> Self {
        TlsConnectionFactory { context }
    }

    pub fn context(&self) -> &TlsContext {
        &self.context
    }

    pub fn policy(&self) -> &dyn TrustPolicy {
        self.context.policy().as_ref()
    }

    /// Connect to `host:port` and perform the TLS handshake
    pub fn connect(&self, host: &str, port: u16) -> Result<TlsConnection> {
        self.context.create_stream(host, port)
    }

    /// Connect to `host:port` from `local_addr:local_port`
    pub fn connect_from(
        &self,
        host: &str,
        port: u16,
        local_addr: IpAddr,
        local_port: u16,
    ) -> Result<TlsConnection> {
        self.context.create_stream_from(host, port, local_addr, local_port)
    }

    /// Connect to an already resolved address
    pub fn connect_addr(&self, addr: IpAddr, port: u16) -> Result<TlsConnection> {
        self.context.create_stream_addr(addr, port)
    }

    /// Connect to an already resolved address from `local_addr:local_port`
    pub fn connect_addr_from(
        &self,
        addr: IpAddr,
        port: u16,
        local_addr: IpAddr,
        local_port: u16,
    ) -> Result<TlsConnection> {
        self.context
            .create_stream_addr_from(addr, port, local_addr, local_port)
    }

    /// Negotiate TLS over an already connected, plaintext socket.
    ///
    /// `host_hint` is sent as SNI when it is a host name. When the handshake
    /// fails and `close_on_failure` is set, `stream` is shut down before the
    /// error is returned; otherwise it is left open for the caller.
    pub fn upgrade(
        &self,
        stream: &TcpStream,
        host_hint: &str,
        port: u16,
        close_on_failure: bool,
    ) -> Result<TlsConnection> {
        self.context.layer(stream, host_hint, port, close_on_failure)
    }

    pub fn default_cipher_suites(&self) -> Vec<String> {
        self.context.default_cipher_suites()
    }

    pub fn supported_cipher_suites(&self) -> Vec<String> {
        self.context.supported_cipher_suites()
    }
}

impl fmt::Debug for TlsConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConnectionFactory")
            .field("policy", &self.policy().name())
            .finish()
    }
}

/// The shared accept-all factory, built on first use
pub fn default_factory() -> Result<&'static TlsConnectionFactory> {
    DEFAULT
        .get_or_init(|| TlsContext::accept_all().map(TlsConnectionFactory::from_context))
        .as_ref()
        .map_err(|e| FactoryError::Initialization(e.clone()))
}

/// A fresh accept-all factory with its own TLS context
pub fn new_factory() -> Result<TlsConnectionFactory> {
    let context = TlsContext::accept_all()?;
    Ok(TlsConnectionFactory::from_context(context))
}

/// Stable name identifying this factory implementation
pub fn factory_identifier() -> String {
    FACTORY_IDENTIFIER.to_string()
}
