//! Certificate summaries and self-signed certificate generation
//!
//! [`CertInfo`] extracts the human-readable parts of an X.509 certificate so
//! connections can report what the peer presented, even though the accept-all
//! policy never looks at it. [`SelfSignedCert`] mints throwaway certificates
//! for local listeners.

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509, X509NameBuilder, X509NameRef, X509Ref};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::{SystemTime, UNIX_EPOCH};

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
    /// Subject Alternative Names (DNS names and IP addresses)
    pub subject_alt_names: Vec<String>,
    /// Start of the validity window, as printed by OpenSSL
    pub not_before: String,
    /// End of the validity window, as printed by OpenSSL
    pub not_after: String,
}

impl CertInfo {
    pub fn from_x509(cert: &X509Ref) -> Self {
        CertInfo {
            subject: common_name(cert.subject_name()),
            issuer: common_name(cert.issuer_name()),
            subject_alt_names: subject_alt_names(cert),
            not_before: cert.not_before().to_string(),
            not_after: cert.not_after().to_string(),
        }
    }

    /// Subject and issuer name the same entity
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }
}

fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().to_string().ok())
        .unwrap_or_else(|| "<undef>".to_string())
}

fn subject_alt_names(cert: &X509Ref) -> Vec<String> {
    let mut names = Vec::new();

    if let Some(san_ext) = cert.subject_alt_names() {
        for name in san_ext {
            if let Some(dns) = name.dnsname() {
                names.push(format!("DNS:{}", dns));
            } else if let Some(ip) = name.ipaddress() {
                if let Ok(octets) = <[u8; 4]>::try_from(ip) {
                    names.push(format!("IP:{}", Ipv4Addr::from(octets)));
                } else if let Ok(octets) = <[u8; 16]>::try_from(ip) {
                    names.push(format!("IP:{}", Ipv6Addr::from(octets)));
                }
            }
        }
    }

    names
}

/// Extract the peer's certificate chain (index 0 is the peer certificate)
pub fn peer_chain(ssl: &openssl::ssl::SslRef) -> Vec<CertInfo> {
    // On the client side the peer chain already starts with the leaf.
    if let Some(chain) = ssl.peer_cert_chain() {
        if !chain.is_empty() {
            return chain.iter().map(CertInfo::from_x509).collect();
        }
    }

    ssl.peer_certificate()
        .map(|cert| vec![CertInfo::from_x509(&cert)])
        .unwrap_or_default()
}

/// A freshly generated self-signed certificate and its private key
pub struct SelfSignedCert {
    pub cert: X509,
    pub key: PKey<Private>,
}

impl SelfSignedCert {
    /// Generate a certificate for `common_name`, valid from yesterday for a year.
    pub fn generate(common_name: &str) -> Result<Self, ErrorStack> {
        Self::generate_with_validity(common_name, -1, 365)
    }

    /// Generate a certificate whose validity window is given in days relative
    /// to now. Negative values lie in the past, so `(-30, -1)` is expired.
    pub fn generate_with_validity(
        common_name: &str,
        not_before_days: i64,
        not_after_days: i64,
    ) -> Result<Self, ErrorStack> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
        let key = PKey::from_ec_key(EcKey::generate(&group)?)?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
        let name = name.build();

        let serial = {
            let mut bn = BigNum::new()?;
            bn.rand(64, MsbOption::MAYBE_ZERO, false)?;
            bn.to_asn1_integer()?
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let not_before = Asn1Time::from_unix((now + not_before_days * 86_400) as libc::time_t)?;
        let not_after = Asn1Time::from_unix((now + not_after_days * 86_400) as libc::time_t)?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(&key)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;

        let san = SubjectAlternativeName::new()
            .dns(common_name)
            .build(&builder.x509v3_context(None, None))?;
        builder.append_extension(san)?;

        builder.sign(&key, MessageDigest::sha256())?;

        Ok(SelfSignedCert {
            cert: builder.build(),
            key,
        })
    }
}
