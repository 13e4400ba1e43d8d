//! Established TLS connections
//!
//! A [`TlsConnection`] is handed to the caller once the handshake succeeds and
//! is owned by the caller from then on. Reads and writes go through OpenSSL;
//! [`TlsConnection::poll_readable`] accounts for records OpenSSL has already
//! decrypted but not yet handed out.

use crate::cert::{peer_chain, CertInfo};
use openssl::ssl::{NameType, SslRef, SslStream};
use openssl::x509::X509;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Parameters negotiated during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Negotiated TLS version (e.g., "TLSv1.3")
    pub version: String,

    /// Negotiated cipher suite
    pub cipher: String,

    /// SNI servername sent to the peer
    pub servername: Option<String>,

    /// Certificate chain (index 0 is peer cert)
    pub cert_chain: Vec<CertInfo>,

    /// Whether session was resumed
    pub sess_reused: bool,
}

impl SessionInfo {
    pub fn from_ssl(ssl: &SslRef) -> Self {
        SessionInfo {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.standard_name().unwrap_or(c.name()).to_string())
                .unwrap_or_else(|| "<undef>".to_string()),
            servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
            cert_chain: peer_chain(ssl),
            sess_reused: ssl.session_reused(),
        }
    }

    /// Get certificate info by index (0 = peer cert, 1+ = chain)
    pub fn cert(&self, index: usize) -> Option<&CertInfo> {
        self.cert_chain.get(index)
    }
}

/// Client side of an encrypted TCP connection
pub struct TlsConnection {
    stream: SslStream<TcpStream>,
    peer: String,
    info: SessionInfo,
    failed: bool,
}

impl TlsConnection {
    pub(crate) fn new(stream: SslStream<TcpStream>, peer: String) -> Self {
        let info = SessionInfo::from_ssl(stream.ssl());
        TlsConnection {
            stream,
            peer,
            info,
            failed: false,
        }
    }

    /// The `host:port` (or address) this connection was opened to
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn session_info(&self) -> &SessionInfo {
        &self.info
    }

    /// The certificate the peer presented, whatever the trust policy made of it
    pub fn peer_certificate(&self) -> Option<X509> {
        self.stream.ssl().peer_certificate()
    }

    pub fn ssl(&self) -> &SslRef {
        self.stream.ssl()
    }

    /// Whether an I/O operation on this connection has failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }

    /// Get mutable reference to underlying TCP stream
    pub fn get_mut(&mut self) -> &mut TcpStream {
        self.stream.get_mut()
    }

    /// Wait until application data can be read, or `timeout` elapses.
    ///
    /// `None` waits indefinitely. Returns `Ok(false)` on timeout.
    pub fn poll_readable(&self, timeout: Option<Duration>) -> io::Result<bool> {
        use libc::{poll, pollfd, POLLIN};

        if self.stream.ssl().pending() > 0 {
            return Ok(true);
        }

        let mut pfd = pollfd {
            fd: self.stream.get_ref().as_raw_fd(),
            events: POLLIN,
            revents: 0,
        };

        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

        if result < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(result > 0)
    }

    /// Send close_notify (unless the connection failed) and shut the socket down
    pub fn close(&mut self) -> io::Result<()> {
        if !self.failed {
            let _ = self.stream.shutdown();
        }

        self.stream.get_mut().shutdown(Shutdown::Both)
    }
}

impl Read for TlsConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).inspect_err(|_| self.failed = true)
    }
}

impl Write for TlsConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf).inspect_err(|_| self.failed = true)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush().inspect_err(|_| self.failed = true)
    }
}

impl fmt::Debug for TlsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConnection")
            .field("peer", &self.peer)
            .field("version", &self.info.version)
            .field("cipher", &self.info.cipher)
            .field("failed", &self.failed)
            .finish()
    }
}
