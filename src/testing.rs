//! Loopback TLS listeners for unit tests

use crate::cert::SelfSignedCert;
use openssl::ssl::{SslAcceptor, SslMethod};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;

/// Acceptor presenting a fresh self-signed certificate for `common_name`
pub(crate) fn acceptor(common_name: &str) -> SslAcceptor {
    acceptor_for(&SelfSignedCert::generate(common_name).unwrap())
}

/// Acceptor presenting `generated`
pub(crate) fn acceptor_for(generated: &SelfSignedCert) -> SslAcceptor {
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server()).unwrap();
    builder.set_private_key(&generated.key).unwrap();
    builder.set_certificate(&generated.cert).unwrap();
    builder.build()
}

/// Accept one TLS connection on 127.0.0.1 and echo until the client closes.
///
/// Returns the port and a handle yielding every byte received.
pub(crate) fn spawn_echo(common_name: &str) -> (u16, thread::JoinHandle<Vec<u8>>) {
    spawn_echo_with(acceptor(common_name))
}

/// Like [`spawn_echo`], with a caller-built acceptor
pub(crate) fn spawn_echo_with(acceptor: SslAcceptor) -> (u16, thread::JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (tcp_stream, _) = listener.accept().unwrap();
        let mut tls = acceptor.accept(tcp_stream).unwrap();

        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match tls.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    received.extend_from_slice(&buf[..n]);
                    if tls.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            }
        }
        received
    });

    (port, handle)
}
