//! TLS connection policies and the handshake-side plumbing.
//!
//! 🛡️ A [`ConnectionPolicy`] describes how accepted connections negotiate TLS
//! (ALPN, protocol bounds, fallback SNI). [`build_server_config`] turns the
//! policies into a `rustls::ServerConfig` whose certificate resolver reads
//! the shared [`CertCache`] at handshake time, so certificates obtained
//! after startup are picked up without rebuilding listeners.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use rustls::crypto::ring;
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::HandshakeKind;
use serde::{Deserialize, Serialize};

use crate::cache::CertCache;
use crate::TlsError;

/// TLS parameters applied to accepted connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionPolicy {
    /// ALPN protocols to offer, most preferred first. Empty means the
    /// standard HTTP set (`h2`, `http/1.1`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,

    /// Minimum TLS version (`tls1.2` or `tls1.3`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_min: Option<String>,

    /// Maximum TLS version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_max: Option<String>,

    /// Subject to resolve when the client sends no SNI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_sni: Option<String>,
}

/// Negotiated-connection facts handed to the HTTP core for placeholders
/// and scheme inference.
#[derive(Debug, Clone, Default)]
pub struct TlsInfo {
    pub version: String,
    pub cipher_suite: String,
    pub resumed: bool,
    pub proto: String,
    pub server_name: String,
    pub client_subject: Option<String>,
    pub client_issuer: Option<String>,
    pub client_serial: Option<String>,
}

impl TlsInfo {
    /// Extract connection facts after the handshake completed.
    pub fn from_connection(conn: &rustls::ServerConnection) -> Self {
        let mut info = Self {
            version: match conn.protocol_version() {
                Some(rustls::ProtocolVersion::TLSv1_2) => "tls1.2".to_string(),
                Some(rustls::ProtocolVersion::TLSv1_3) => "tls1.3".to_string(),
                Some(other) => format!("{other:?}"),
                None => String::new(),
            },
            cipher_suite: conn
                .negotiated_cipher_suite()
                .map(|cs| format!("{:?}", cs.suite()))
                .unwrap_or_default(),
            resumed: conn.handshake_kind() == Some(HandshakeKind::Resumed),
            proto: conn
                .alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .unwrap_or_default(),
            server_name: conn.server_name().unwrap_or_default().to_string(),
            client_subject: None,
            client_issuer: None,
            client_serial: None,
        };
        if let Some(cert) = conn.peer_certificates().and_then(|certs| certs.first()) {
            if let Ok((_, parsed)) = x509_parser::parse_x509_certificate(cert.as_ref()) {
                info.client_subject = Some(parsed.subject().to_string());
                info.client_issuer = Some(parsed.issuer().to_string());
                info.client_serial = Some(parsed.raw_serial_as_string());
            }
        }
        info
    }
}

/// Parse a PEM chain + private key into rustls key material.
pub fn certified_key_from_pem(cert_pem: &str, key_pem: &str) -> Result<CertifiedKey, TlsError> {
    let mut reader = Cursor::new(cert_pem);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|r| r.ok())
        .collect();
    if certs.is_empty() {
        return Err(TlsError::Certificate(
            "no certificates found in PEM".to_string(),
        ));
    }

    let mut reader = Cursor::new(key_pem);
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::Certificate(format!("reading private key: {e}")))?
        .ok_or_else(|| TlsError::Certificate("no private key found in PEM".to_string()))?;

    let signing_key = ring::sign::any_supported_type(&key)
        .map_err(|_| TlsError::Certificate("unsupported private key type".to_string()))?;

    Ok(CertifiedKey::new(certs, signing_key))
}

/// Build a rustls server config for HTTP/1.1 + HTTP/2 listeners.
pub fn build_server_config(
    policies: &[ConnectionPolicy],
    cache: CertCache,
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    build_with_alpn(policies, cache, &["h2", "http/1.1"])
}

/// Build a rustls server config for QUIC (HTTP/3) endpoints.
pub fn build_h3_server_config(
    policies: &[ConnectionPolicy],
    cache: CertCache,
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    build_with_alpn(policies, cache, &["h3"])
}

fn build_with_alpn(
    policies: &[ConnectionPolicy],
    cache: CertCache,
    default_alpn: &[&str],
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let policy = policies.first().cloned().unwrap_or_default();

    let versions = protocol_versions(policy.protocol_min.as_deref(), policy.protocol_max.as_deref())?;
    let resolver = CacheCertResolver {
        cache,
        default_sni: policy.default_sni.clone(),
    };

    let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_protocol_versions(&versions)
        .map_err(|e| TlsError::Config(format!("selecting TLS versions: {e}")))?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(resolver));

    config.alpn_protocols = if policy.alpn.is_empty() {
        default_alpn.iter().map(|p| p.as_bytes().to_vec()).collect()
    } else {
        policy.alpn.iter().map(|p| p.as_bytes().to_vec()).collect()
    };

    Ok(Arc::new(config))
}

fn protocol_versions(
    min: Option<&str>,
    max: Option<&str>,
) -> Result<Vec<&'static rustls::SupportedProtocolVersion>, TlsError> {
    fn rank(v: &str) -> Result<u8, TlsError> {
        match v {
            "tls1.2" => Ok(2),
            "tls1.3" => Ok(3),
            other => Err(TlsError::Config(format!("unknown TLS version {other:?}"))),
        }
    }
    let lo = min.map(rank).transpose()?.unwrap_or(2);
    let hi = max.map(rank).transpose()?.unwrap_or(3);
    if lo > hi {
        return Err(TlsError::Config(
            "protocol_min is above protocol_max".to_string(),
        ));
    }
    let mut versions = Vec::new();
    if lo <= 2 && hi >= 2 {
        versions.push(&rustls::version::TLS12);
    }
    if hi >= 3 {
        versions.push(&rustls::version::TLS13);
    }
    Ok(versions)
}

// MARK: - Resolver

/// 🔍 SNI resolver backed by the shared certificate cache.
struct CacheCertResolver {
    cache: CertCache,
    default_sni: Option<String>,
}

impl fmt::Debug for CacheCertResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCertResolver")
            .field("default_sni", &self.default_sni)
            .finish()
    }
}

impl ResolvesServerCert for CacheCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let name = client_hello
            .server_name()
            .map(str::to_string)
            .or_else(|| self.default_sni.clone());
        match name {
            Some(name) => self.cache.resolve(&name).map(|c| c.certified.clone()),
            // no SNI and no configured default: serve anything we have
            None => self.cache.any().map(|c| c.certified.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::InternalIssuer;

    #[test]
    fn version_bounds() {
        assert_eq!(protocol_versions(None, None).unwrap().len(), 2);
        assert_eq!(
            protocol_versions(Some("tls1.3"), None).unwrap().len(),
            1
        );
        assert!(protocol_versions(Some("tls1.3"), Some("tls1.2")).is_err());
        assert!(protocol_versions(Some("ssl3"), None).is_err());
    }

    #[test]
    fn config_builds_with_policies_and_certs() {
        let cache = CertCache::default();
        cache.insert(
            InternalIssuer::default()
                .issue(&["localhost".to_string()])
                .unwrap(),
        );
        let policy = ConnectionPolicy {
            alpn: vec!["http/1.1".to_string()],
            ..Default::default()
        };
        let config = build_server_config(&[policy], cache).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn certified_key_round_trip() {
        let cert = InternalIssuer::default()
            .issue(&["example.internal".to_string()])
            .unwrap();
        let key = certified_key_from_pem(&cert.cert_pem, &cert.key_pem).unwrap();
        assert!(!key.cert.is_empty());
    }
}
