//! Loopback servers shared by the integration tests

#![allow(dead_code)]

use openssl::ssl::{SslAcceptor, SslMethod};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use trust_tls::cert::SelfSignedCert;

/// Acceptor presenting a fresh self-signed certificate for `common_name`
pub fn acceptor(common_name: &str) -> SslAcceptor {
    let generated = SelfSignedCert::generate(common_name).unwrap();
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server()).unwrap();
    builder.set_private_key(&generated.key).unwrap();
    builder.set_certificate(&generated.cert).unwrap();
    builder.build()
}

/// TLS echo server on 127.0.0.1 handling `connections` clients, one thread each.
///
/// The handle yields the bytes each client sent, in accept order.
pub fn spawn_echo_server(
    common_name: &str,
    connections: usize,
) -> (u16, thread::JoinHandle<Vec<Vec<u8>>>) {
    let acceptor = acceptor(common_name);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let mut workers = Vec::new();
        for _ in 0..connections {
            let (tcp_stream, _) = listener.accept().unwrap();
            let acceptor = acceptor.clone();
            workers.push(thread::spawn(move || {
                let tls = acceptor.accept(tcp_stream).unwrap();
                echo(tls)
            }));
        }
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    (port, handle)
}

fn echo<S: Read + Write>(mut stream: S) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                received.extend_from_slice(&buf[..n]);
                if stream.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
        }
    }
    received
}

/// Plain TCP server that answers the first read with `reply` and then hangs up
pub fn spawn_plaintext_server(reply: &'static [u8]) -> (u16, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (mut tcp_stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 1024];
        let _ = tcp_stream.read(&mut buf);
        let _ = tcp_stream.write_all(reply);
    });

    (port, handle)
}

/// A connected pair of loopback sockets: (client side, server side)
pub fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, server)
}
