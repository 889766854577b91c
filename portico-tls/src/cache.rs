//! In-memory certificate cache, indexed by SAN.
//!
//! 💾 Each SAN entry points at the certificate bundle, so a lookup by
//! subject is a map probe plus one wildcard probe. The cache is shared
//! between the automation side (which inserts) and the connection side
//! (whose SNI resolver reads it during handshakes).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustls::sign::CertifiedKey;

use crate::connection::certified_key_from_pem;
use crate::policy::subject_matches;
use crate::TlsError;

// MARK: - Certificate

/// A loaded certificate bundle.
pub struct Certificate {
    /// Subject alternative names, lowercased.
    pub sans: Vec<String>,
    /// Full chain, PEM.
    pub cert_pem: String,
    /// Private key, PEM.
    pub key_pem: String,
    /// Expiry as a unix timestamp.
    pub not_after: i64,
    /// Pre-parsed key material for rustls handshakes.
    pub certified: Arc<CertifiedKey>,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("sans", &self.sans)
            .field("not_after", &self.not_after)
            .finish()
    }
}

impl Certificate {
    /// Parse a PEM chain + key into a bundle, extracting SANs and expiry
    /// from the leaf.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, TlsError> {
        let certified = certified_key_from_pem(cert_pem, key_pem)?;
        let leaf = certified
            .cert
            .first()
            .ok_or_else(|| TlsError::Certificate("empty certificate chain".to_string()))?;
        let (_, parsed) = x509_parser::parse_x509_certificate(leaf.as_ref())
            .map_err(|e| TlsError::Certificate(format!("parsing leaf certificate: {e}")))?;

        let mut sans = Vec::new();
        if let Ok(Some(ext)) = parsed.subject_alternative_name() {
            for general_name in &ext.value.general_names {
                match general_name {
                    x509_parser::extensions::GeneralName::DNSName(dns) => {
                        sans.push(dns.to_ascii_lowercase());
                    }
                    x509_parser::extensions::GeneralName::IPAddress(raw) => {
                        if let Some(ip) = ip_from_der(raw) {
                            sans.push(ip.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
        if sans.is_empty() {
            if let Some(cn) = parsed
                .subject()
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
            {
                sans.push(cn.to_ascii_lowercase());
            }
        }
        if sans.is_empty() {
            return Err(TlsError::Certificate(
                "certificate has no usable subject names".to_string(),
            ));
        }

        Ok(Self {
            sans,
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
            not_after: parsed.validity().not_after.timestamp(),
            certified: Arc::new(certified),
        })
    }

    /// Whether any SAN covers `name`.
    pub fn matches(&self, name: &str) -> bool {
        self.sans.iter().any(|san| subject_matches(san, name))
    }
}

fn ip_from_der(raw: &[u8]) -> Option<std::net::IpAddr> {
    match raw.len() {
        4 => {
            let octets: [u8; 4] = raw.try_into().ok()?;
            Some(std::net::IpAddr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = raw.try_into().ok()?;
            Some(std::net::IpAddr::from(octets))
        }
        _ => None,
    }
}

// MARK: - Certificate Cache

/// Shared SAN-indexed certificate cache.
#[derive(Clone, Default)]
pub struct CertCache {
    inner: Arc<RwLock<HashMap<String, Vec<Arc<Certificate>>>>>,
}

impl CertCache {
    pub fn insert(&self, cert: Certificate) {
        let cert = Arc::new(cert);
        let mut map = self.inner.write();
        for san in &cert.sans {
            map.entry(san.clone()).or_default().push(cert.clone());
        }
    }

    /// All certificates whose SANs cover `name`, exact entries first.
    pub fn all_matching(&self, name: &str) -> Vec<Arc<Certificate>> {
        let name = name.to_ascii_lowercase();
        let map = self.inner.read();
        let mut found: Vec<Arc<Certificate>> = Vec::new();
        if let Some(certs) = map.get(&name) {
            found.extend(certs.iter().cloned());
        }
        // one wildcard probe: replace the first label
        if let Some((_, rest)) = name.split_once('.') {
            if let Some(certs) = map.get(&format!("*.{rest}")) {
                found.extend(certs.iter().cloned());
            }
        }
        found
    }

    pub fn has(&self, name: &str) -> bool {
        !self.all_matching(name).is_empty()
    }

    /// Resolve the certificate to serve for an SNI name.
    pub fn resolve(&self, name: &str) -> Option<Arc<Certificate>> {
        self.all_matching(name).into_iter().next()
    }

    /// Any certificate at all, used as a last-resort default when the
    /// client sent no SNI.
    pub fn any(&self) -> Option<Arc<Certificate>> {
        self.inner
            .read()
            .values()
            .flat_map(|v| v.iter())
            .next()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .values()
            .flat_map(|v| v.iter())
            .map(|c| Arc::as_ptr(c))
            .collect::<std::collections::HashSet<_>>()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
