//! TLS context and stream creation
//!
//! [`TlsContext`] owns the OpenSSL client context and knows how to turn a
//! host, an address or an existing socket into a [`TlsConnection`]. It is the
//! layer [`TlsConnectionFactory`](crate::TlsConnectionFactory) forwards to.

use crate::config::FactoryBuilder;
use crate::connection::TlsConnection;
use crate::error::FactoryError;
use crate::policy::{accept_all, install_policy, PeerRole, TrustPolicy};
use crate::Result;
use foreign_types::ForeignTypeRef;
use openssl::error::ErrorStack;
use openssl::ssl::{
    HandshakeError, Ssl, SslCipher, SslContext, SslContextBuilder, SslContextRef, SslMethod,
};
use openssl::stack::StackRef;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// TLS 1.3 suite names OpenSSL releases have shipped, integrity-only ones
/// included. Each is kept only if the linked library accepts it.
const TLS13_SUITE_NAMES: &[&str] = &[
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_128_CCM_SHA256",
    "TLS_AES_128_CCM_8_SHA256",
    "TLS_SHA384_SHA384",
    "TLS_SHA256_SHA256",
];

static SUPPORTED: OnceLock<std::result::Result<Arc<[String]>, ErrorStack>> = OnceLock::new();

extern "C" {
    fn SSL_CTX_get_ciphers(ctx: *const openssl_sys::SSL_CTX) -> *mut openssl_sys::stack_st_SSL_CIPHER;
}

/// Client TLS context bound to a single trust policy
#[derive(Clone)]
pub struct TlsContext {
    ctx: SslContext,
    policy: Arc<dyn TrustPolicy>,
    supported_suites: Arc<[String]>,
}

impl TlsContext {
    /// Context with OpenSSL defaults and the accept-all policy
    pub fn accept_all() -> std::result::Result<Self, ErrorStack> {
        let policy = accept_all();
        let builder = base_builder()?;
        Self::finish(builder, policy)
    }

    /// Context configured from a [`FactoryBuilder`]
    pub fn with_config(config: &FactoryBuilder) -> Result<Self> {
        config.validate()?;

        let mut builder = base_builder()?;

        if let Some(min) = config.min_version {
            builder.set_min_proto_version(Some(min.to_openssl_version()))?;
        }
        if let Some(max) = config.max_version {
            builder.set_max_proto_version(Some(max.to_openssl_version()))?;
        }
        if let Some(ref ciphers) = config.cipher_list {
            builder.set_cipher_list(ciphers).map_err(|e| {
                FactoryError::InvalidConfig(format!("cipher list {:?}: {}", ciphers, e))
            })?;
        }
        if let Some(ref suites) = config.ciphersuites {
            builder.set_ciphersuites(suites).map_err(|e| {
                FactoryError::InvalidConfig(format!("ciphersuites {:?}: {}", suites, e))
            })?;
        }

        Ok(Self::finish(builder, config.policy.clone())?)
    }

    fn finish(
        mut builder: SslContextBuilder,
        policy: Arc<dyn TrustPolicy>,
    ) -> std::result::Result<Self, ErrorStack> {
        install_policy(&mut builder, policy.clone(), PeerRole::Server)?;
        let supported_suites = platform_cipher_suites()?;
        let ctx = builder.build();

        debug!(policy = policy.name(), "TLS client context initialized");

        Ok(TlsContext {
            ctx,
            policy,
            supported_suites,
        })
    }

    /// The trust policy every handshake from this context consults
    pub fn policy(&self) -> &Arc<dyn TrustPolicy> {
        &self.policy
    }

    /// The underlying OpenSSL context
    pub fn ssl_context(&self) -> &SslContextRef {
        &self.ctx
    }

    /// Resolve `host`, connect and handshake.
    pub fn create_stream(&self, host: &str, port: u16) -> Result<TlsConnection> {
        let addrs = resolve(host, port)?;
        let tcp = connect_any(&addrs, None)?;
        self.handshake(tcp, server_name(host), format!("{}:{}", host, port))
    }

    /// Resolve `host`, bind the local end to `local_addr:local_port`, connect and handshake.
    pub fn create_stream_from(
        &self,
        host: &str,
        port: u16,
        local_addr: IpAddr,
        local_port: u16,
    ) -> Result<TlsConnection> {
        let addrs = resolve(host, port)?;
        let local = SocketAddr::new(local_addr, local_port);
        let tcp = connect_any(&addrs, Some(local))?;
        self.handshake(tcp, server_name(host), format!("{}:{}", host, port))
    }

    /// Connect to a resolved address and handshake.
    pub fn create_stream_addr(&self, addr: IpAddr, port: u16) -> Result<TlsConnection> {
        let remote = SocketAddr::new(addr, port);
        let tcp = open_tcp(remote, None)?;
        self.handshake(tcp, None, remote.to_string())
    }

    /// Connect to a resolved address from `local_addr:local_port` and handshake.
    pub fn create_stream_addr_from(
        &self,
        addr: IpAddr,
        port: u16,
        local_addr: IpAddr,
        local_port: u16,
    ) -> Result<TlsConnection> {
        let remote = SocketAddr::new(addr, port);
        let tcp = open_tcp(remote, Some(SocketAddr::new(local_addr, local_port)))?;
        self.handshake(tcp, None, remote.to_string())
    }

    /// Run a client handshake over an already connected socket.
    ///
    /// The connection wraps a duplicate handle of `stream`; the caller's handle
    /// stays valid either way. If the handshake fails and `close_on_failure`
    /// is set, the socket is shut down before the error is returned.
    pub fn layer(
        &self,
        stream: &TcpStream,
        host: &str,
        port: u16,
        close_on_failure: bool,
    ) -> Result<TlsConnection> {
        let tcp = stream.try_clone()?;

        match self.handshake(tcp, server_name(host), format!("{}:{}", host, port)) {
            Ok(conn) => Ok(conn),
            Err(err) => {
                if close_on_failure {
                    warn!(host, port, error = %err, "closing socket after failed TLS upgrade");
                    if let Err(e) = stream.shutdown(Shutdown::Both) {
                        debug!(error = %e, "socket shutdown after failed upgrade");
                    }
                }
                Err(err)
            }
        }
    }

    /// Cipher suites enabled in this context
    pub fn default_cipher_suites(&self) -> Vec<String> {
        cipher_names(&self.ctx)
    }

    /// Cipher suites the linked OpenSSL implements.
    ///
    /// TLS 1.2 and older come from OpenSSL's `ALL:COMPLEMENTOFALL`. OpenSSL
    /// offers no listing of TLS 1.3 suites, so known names are offered one by
    /// one and kept if the library takes them; a suite newer than any name
    /// known here is missing from the result.
    pub fn supported_cipher_suites(&self) -> Vec<String> {
        self.supported_suites.to_vec()
    }

    fn handshake(
        &self,
        tcp: TcpStream,
        server_name: Option<&str>,
        peer: String,
    ) -> Result<TlsConnection> {
        let mut ssl = Ssl::new(&self.ctx).map_err(|e| FactoryError::Handshake {
            peer: peer.clone(),
            source: e.into(),
        })?;

        // SNI only; hostname verification is the policy's business
        if let Some(name) = server_name {
            ssl.set_hostname(name).map_err(|e| FactoryError::Handshake {
                peer: peer.clone(),
                source: e.into(),
            })?;
        }

        match ssl.connect(tcp) {
            Ok(stream) => {
                let conn = TlsConnection::new(stream, peer);
                let info = conn.session_info();
                debug!(
                    peer = conn.peer(),
                    version = %info.version,
                    cipher = %info.cipher,
                    "TLS handshake complete"
                );
                Ok(conn)
            }
            Err(e) => {
                let source = match e {
                    HandshakeError::SetupFailure(stack) => stack.into(),
                    HandshakeError::Failure(mid) | HandshakeError::WouldBlock(mid) => {
                        mid.into_error()
                    }
                };
                debug!(peer = %peer, error = %source, "TLS handshake failed");
                Err(FactoryError::Handshake { peer, source })
            }
        }
    }
}

fn base_builder() -> std::result::Result<SslContextBuilder, ErrorStack> {
    // Fail construction, not the first handshake, if the CSPRNG is unusable.
    let mut sample = [0u8; 16];
    openssl::rand::rand_bytes(&mut sample)?;

    // No client certificate is configured
    SslContextBuilder::new(SslMethod::tls_client())
}

/// Computed once per process, shared by every context
fn platform_cipher_suites() -> std::result::Result<Arc<[String]>, ErrorStack> {
    SUPPORTED.get_or_init(discover_cipher_suites).clone()
}

fn discover_cipher_suites() -> std::result::Result<Arc<[String]>, ErrorStack> {
    let mut tls13 = Vec::new();
    for &suite in TLS13_SUITE_NAMES {
        let mut builder = SslContextBuilder::new(SslMethod::tls_client())?;
        if builder.set_ciphersuites(suite).is_err() {
            continue;
        }
        if cipher_names(&builder.build()).iter().any(|name| name == suite) {
            tls13.push(suite);
        }
    }

    let mut builder = SslContextBuilder::new(SslMethod::tls_client())?;
    builder.set_cipher_list("ALL:COMPLEMENTOFALL")?;
    if !tls13.is_empty() {
        builder.set_ciphersuites(&tls13.join(":"))?;
    }
    debug!(tls13 = tls13.len(), "discovered platform cipher suites");
    Ok(cipher_names(&builder.build()).into())
}

fn cipher_names(ctx: &SslContextRef) -> Vec<String> {
    // SAFETY: the stack belongs to `ctx` and is only read while `ctx` is borrowed.
    unsafe {
        let ptr = SSL_CTX_get_ciphers(ctx.as_ptr());
        if ptr.is_null() {
            return Vec::new();
        }
        StackRef::<SslCipher>::from_ptr(ptr)
            .iter()
            .map(|cipher| cipher.standard_name().unwrap_or(cipher.name()).to_string())
            .collect()
    }
}

/// SNI value for `host`, skipped for IP literals and empty hints
fn server_name(host: &str) -> Option<&str> {
    if host.is_empty() || host.parse::<IpAddr>().is_ok() {
        None
    } else {
        Some(host)
    }
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| FactoryError::Resolution {
            host: host.to_string(),
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(FactoryError::Resolution {
            host: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        });
    }

    Ok(addrs)
}

/// Try each address in turn, reporting the last failure
fn connect_any(addrs: &[SocketAddr], local: Option<SocketAddr>) -> Result<TcpStream> {
    // A local bind pins the address family; prefer targets that match it.
    let mut candidates: Vec<SocketAddr> = match local {
        Some(local) => addrs
            .iter()
            .copied()
            .filter(|addr| addr.is_ipv4() == local.is_ipv4())
            .collect(),
        None => Vec::new(),
    };
    if candidates.is_empty() {
        candidates = addrs.to_vec();
    }

    let mut last_err = None;
    for addr in candidates {
        debug!(%addr, "connecting");
        match open_tcp(addr, local) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        FactoryError::Io(io::Error::new(io::ErrorKind::InvalidInput, "no address to connect to"))
    }))
}

fn open_tcp(addr: SocketAddr, local: Option<SocketAddr>) -> Result<TcpStream> {
    let Some(local) = local else {
        return TcpStream::connect(addr).map_err(|source| FactoryError::Connect { addr, source });
    };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|source| FactoryError::Connect { addr, source })?;
    socket
        .bind(&SockAddr::from(local))
        .map_err(|source| FactoryError::Bind { local, source })?;
    socket
        .connect(&SockAddr::from(addr))
        .map_err(|source| FactoryError::Connect { addr, source })?;

    Ok(socket.into())
}
