//! Trust policies
//!
//! A [`TrustPolicy`] decides whether the certificate chain a peer presents
//! during the handshake is acceptable. It replaces OpenSSL's chain validation
//! entirely: the policy is installed as the verification callback of the
//! context and decides once per presented chain, so hostname, expiry and chain-of-trust checks happen only if
//! the policy performs them.
//!
//! The only policy shipped is [`AcceptAll`], which approves everything.

use crate::error::VerificationError;
use openssl::error::ErrorStack;
use openssl::ssl::{SslContextBuilder, SslVerifyMode};
use openssl::stack::Stack;
use openssl::x509::{X509, X509Name, X509StoreContextRef, X509VerifyResult};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Distinguished name of an acceptable certificate issuer
pub type Issuer = X509Name;

/// Role of the peer whose chain is being verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerRole {
    /// We are the client and the chain came from the server
    Server,
    /// We are the server and the chain came from a client (mutual TLS)
    Client,
}

impl PeerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerRole::Server => "server",
            PeerRole::Client => "client",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Certificate verification strategy used during the handshake
///
/// Implementations are shared between contexts and invoked from concurrent
/// handshakes, hence the `Send + Sync` bound.
pub trait TrustPolicy: Send + Sync {
    /// Decide whether `chain` (leaf first) is acceptable for a peer in `role`.
    ///
    /// `chain` may be empty, and may contain expired or self-signed
    /// certificates; it is whatever the peer presented.
    fn verify_chain(&self, chain: &[X509], role: PeerRole) -> Result<(), VerificationError>;

    /// Issuers advertised to clients when requesting a client certificate.
    fn accepted_issuers(&self) -> Vec<Issuer>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "custom"
    }
}

/// Blind trust: every chain is accepted, no issuers are advertised.
///
/// Use only against endpoints on a controlled network, such as directory
/// servers with self-signed certificates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptAll;

impl TrustPolicy for AcceptAll {
    fn verify_chain(&self, _chain: &[X509], _role: PeerRole) -> Result<(), VerificationError> {
        Ok(())
    }

    fn accepted_issuers(&self) -> Vec<Issuer> {
        Vec::new()
    }

    fn name(&self) -> &str {
        "accept-all"
    }
}

static ACCEPT_ALL: OnceLock<Arc<dyn TrustPolicy>> = OnceLock::new();

/// The process-wide accept-all policy instance
pub fn accept_all() -> Arc<dyn TrustPolicy> {
    ACCEPT_ALL.get_or_init(|| Arc::new(AcceptAll)).clone()
}

/// Install `policy` as the sole certificate verifier of `builder`.
///
/// With [`PeerRole::Server`] the builder is expected to be a client context.
/// With [`PeerRole::Client`] it is a server context: client certificates are
/// requested (but not required) and the policy's issuers are advertised.
pub fn install_policy(
    builder: &mut SslContextBuilder,
    policy: Arc<dyn TrustPolicy>,
    role: PeerRole,
) -> Result<(), ErrorStack> {
    if role == PeerRole::Client {
        let issuers = policy.accepted_issuers();
        if !issuers.is_empty() {
            let mut list = Stack::new()?;
            for issuer in issuers {
                list.push(issuer)?;
            }
            builder.set_client_ca_list(list);
        }
    }

    builder.set_verify_callback(SslVerifyMode::PEER, move |preverify_ok, store| {
        check_chain(policy.as_ref(), preverify_ok, store, role)
    });
    Ok(())
}

/// Verify callback body.
///
/// OpenSSL calls back once per error it finds and once more for every
/// certificate that passed its own checks, leaf last. Only that final leaf
/// call reaches the policy; everything before it is deferred.
fn check_chain(
    policy: &dyn TrustPolicy,
    preverify_ok: bool,
    store: &mut X509StoreContextRef,
    role: PeerRole,
) -> bool {
    if !preverify_ok || store.error_depth() > 0 {
        return true;
    }

    let platform_error = store.error();
    let chain = presented_chain(store);

    match policy.verify_chain(&chain, role) {
        Ok(()) => {
            if platform_error != X509VerifyResult::OK {
                debug!(
                    policy = policy.name(),
                    %role,
                    platform_error = %platform_error,
                    "certificate chain accepted by trust policy"
                );
            }
            store.set_error(X509VerifyResult::OK);
            true
        }
        Err(err) => {
            warn!(policy = policy.name(), %role, error = %err, "certificate chain rejected");
            store.set_error(X509VerifyResult::APPLICATION_VERIFICATION);
            false
        }
    }
}

fn presented_chain(store: &X509StoreContextRef) -> Vec<X509> {
    if let Some(chain) = store.chain() {
        if !chain.is_empty() {
            return chain.iter().map(|cert| cert.to_owned()).collect();
        }
    }

    store
        .current_cert()
        .map(|cert| vec![cert.to_owned()])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::SelfSignedCert;
    use crate::context::TlsContext;
    use foreign_types::ForeignTypeRef;
    use openssl::nid::Nid;
    use openssl::ssl::{Ssl, SslAcceptor, SslContext, SslMethod, SslRef};
    use openssl::stack::StackRef;
    use std::net::{IpAddr, Ipv4Addr, TcpListener};
    use std::thread;

    #[test]
    fn test_accept_all_empty_chain() {
        assert!(AcceptAll.verify_chain(&[], PeerRole::Server).is_ok());
        assert!(AcceptAll.verify_chain(&[], PeerRole::Client).is_ok());
    }

    #[test]
    fn test_accept_all_self_signed_and_expired() {
        let self_signed = SelfSignedCert::generate("example.test").unwrap();
        let expired = SelfSignedCert::generate_with_validity("expired.test", -30, -1).unwrap();

        let chain = vec![self_signed.cert.clone(), expired.cert.clone()];
        assert!(AcceptAll.verify_chain(&chain, PeerRole::Server).is_ok());
        assert!(AcceptAll.verify_chain(&[expired.cert], PeerRole::Client).is_ok());
    }

    #[test]
    fn test_accept_all_no_issuers() {
        assert!(AcceptAll.accepted_issuers().is_empty());
        assert!(accept_all().accepted_issuers().is_empty());
    }

    #[test]
    fn test_shared_instance() {
        let a = accept_all();
        let b = accept_all();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "accept-all");
    }

    #[test]
    fn test_peer_role_display() {
        assert_eq!(PeerRole::Server.to_string(), "server");
        assert_eq!(PeerRole::Client.as_str(), "client");
    }

    #[test]
    fn test_install_on_client_context() {
        let mut builder = SslContext::builder(SslMethod::tls_client()).unwrap();
        install_policy(&mut builder, accept_all(), PeerRole::Server).unwrap();
        let ctx = builder.build();
        assert_eq!(ctx.verify_mode(), SslVerifyMode::PEER);
    }

    /// Accepts everything, advertises one issuer by common name
    struct Advertising(&'static str);

    impl TrustPolicy for Advertising {
        fn verify_chain(&self, _chain: &[X509], _role: PeerRole) -> Result<(), VerificationError> {
            Ok(())
        }

        fn accepted_issuers(&self) -> Vec<Issuer> {
            let mut name = openssl::x509::X509NameBuilder::new().unwrap();
            name.append_entry_by_nid(Nid::COMMONNAME, self.0).unwrap();
            vec![name.build()]
        }
    }

    extern "C" {
        fn SSL_get_client_CA_list(
            ssl: *const openssl_sys::SSL,
        ) -> *mut openssl_sys::stack_st_X509_NAME;
    }

    /// Common names of the CA list `ssl` sends in its certificate request
    fn advertised_names(ssl: &SslRef) -> Vec<String> {
        unsafe {
            let ptr = SSL_get_client_CA_list(ssl.as_ptr());
            if ptr.is_null() {
                return Vec::new();
            }
            StackRef::<X509Name>::from_ptr(ptr)
                .iter()
                .filter_map(|name| name.entries_by_nid(Nid::COMMONNAME).next())
                .filter_map(|entry| entry.data().to_string().ok())
                .collect()
        }
    }

    #[test]
    fn test_client_role_advertises_issuers() {
        let generated = SelfSignedCert::generate("server.test").unwrap();
        let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server()).unwrap();
        builder.set_private_key(&generated.key).unwrap();
        builder.set_certificate(&generated.cert).unwrap();
        install_policy(&mut builder, Arc::new(Advertising("Directory CA")), PeerRole::Client)
            .unwrap();
        let acceptor = builder.build();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (tcp_stream, _) = listener.accept().unwrap();
            let tls = acceptor.accept(tcp_stream).unwrap();
            advertised_names(tls.ssl())
        });

        let ctx = TlsContext::accept_all().unwrap();
        let conn = ctx
            .create_stream_addr(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
            .unwrap();
        drop(conn);

        assert_eq!(server.join().unwrap(), vec!["Directory CA".to_string()]);
    }

    #[test]
    fn test_server_role_advertises_nothing() {
        let mut builder = SslContext::builder(SslMethod::tls_server()).unwrap();
        install_policy(&mut builder, Arc::new(Advertising("Directory CA")), PeerRole::Server)
            .unwrap();
        let ctx = builder.build();
        let ssl = Ssl::new(&ctx).unwrap();
        assert!(advertised_names(&ssl).is_empty());
    }
}
