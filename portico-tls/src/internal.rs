//! Internal issuer: locally generated, self-signed certificates.
//!
//! Used for subjects that can never pass public validation (IP addresses,
//! single-label names, `localhost`). Clients must trust the generated
//! certificate out of band.

use serde::{Deserialize, Serialize};

use crate::cache::Certificate;
use crate::TlsError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InternalIssuer {}

impl InternalIssuer {
    /// Issue a self-signed certificate covering `domains`.
    pub fn issue(&self, domains: &[String]) -> Result<Certificate, TlsError> {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(domains.to_vec())
                .map_err(|e| TlsError::Certificate(format!("generating self-signed certificate: {e}")))?;
        Certificate::from_pem(&cert.pem(), &key_pair.serialize_pem())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_usable_self_signed() {
        let cert = InternalIssuer::default()
            .issue(&["10.0.0.1".to_string(), "localhost".to_string()])
            .unwrap();
        assert!(cert.matches("localhost"));
        assert!(cert.matches("10.0.0.1"));
        assert!(cert.not_after > 0);
    }
}
