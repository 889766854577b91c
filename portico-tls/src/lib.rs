//! TLS automation for Portico
//!
//! Owns automation policies, the certificate cache, and the ACME/internal
//! issuers. The HTTP core talks to this crate through [`TlsApp`], a narrow
//! facade: certificate lookups, HTTP-01 challenge interception, policy
//! management, and `manage()` to kick off issuance for a set of names.

pub mod acme;
pub mod cache;
pub mod connection;
pub mod internal;
pub mod policy;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::acme::{AcmeIssuer, ChallengeMap, ACME_CHALLENGE_PREFIX};
pub use crate::cache::{CertCache, Certificate};
pub use crate::connection::{build_h3_server_config, build_server_config, ConnectionPolicy, TlsInfo};
pub use crate::internal::InternalIssuer;
pub use crate::policy::{AutomationConfig, AutomationPolicy, IssuerConfig};

/// Errors from the TLS subsystem.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("ACME error: {0}")]
    Acme(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serde surface of the TLS app (`apps.tls` in the top-level config).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Certificate automation: policies mapping subjects to issuers.
    #[serde(default)]
    pub automation: AutomationConfig,

    /// Certificates supplied inline as PEM pairs, loaded into the cache
    /// at construction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_pem: Vec<PemPair>,
}

/// An inline certificate chain + private key, both PEM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PemPair {
    pub certificate: String,
    pub key: String,
}

/// 🛡️ The TLS subsystem facade consumed by the HTTP core.
///
/// All state is internally synchronized; the core holds it behind an `Arc`
/// and never takes a lock across a handler invocation.
pub struct TlsApp {
    automation: RwLock<AutomationConfig>,
    cache: CertCache,
    challenges: ChallengeMap,
}

impl TlsApp {
    /// Build the app from its config, loading any inline certificates.
    pub fn new(config: TlsConfig) -> Result<Arc<Self>, TlsError> {
        let cache = CertCache::default();
        for pair in &config.load_pem {
            let cert = Certificate::from_pem(&pair.certificate, &pair.key)?;
            cache.insert(cert);
        }
        Ok(Arc::new(Self {
            automation: RwLock::new(config.automation),
            cache,
            challenges: ChallengeMap::default(),
        }))
    }

    /// Whether any loaded certificate's SAN covers `name`.
    pub fn has_certificate_for_subject(&self, name: &str) -> bool {
        self.cache.has(name)
    }

    /// All loaded certificates whose SANs cover `name`.
    pub fn all_matching_certificates(&self, name: &str) -> Vec<Arc<Certificate>> {
        self.cache.all_matching(name)
    }

    /// Handle on the certificate cache (used by connection-policy resolvers).
    pub fn cache(&self) -> CertCache {
        self.cache.clone()
    }

    /// Read access to the automation config.
    pub fn automation(&self) -> parking_lot::RwLockReadGuard<'_, AutomationConfig> {
        self.automation.read()
    }

    /// Write access to the automation config (used by the auto-HTTPS
    /// planner to adopt/amend the catch-all policy).
    pub fn automation_mut(&self) -> parking_lot::RwLockWriteGuard<'_, AutomationConfig> {
        self.automation.write()
    }

    /// Append an automation policy.
    pub fn add_automation_policy(&self, policy: AutomationPolicy) -> Result<(), TlsError> {
        let mut automation = self.automation.write();
        automation.policies.push(policy);
        automation.validate()
    }

    /// Validate the complete automation configuration.
    pub fn validate(&self) -> Result<(), TlsError> {
        self.automation.read().validate()
    }

    /// Intercept ACME HTTP-01 challenge requests.
    ///
    /// Returns a ready response when the request is a known challenge,
    /// `None` when the request should proceed through normal routing.
    pub fn handle_http_challenge(
        &self,
        parts: &http::request::Parts,
    ) -> Option<http::Response<Bytes>> {
        let token = parts.uri.path().strip_prefix(ACME_CHALLENGE_PREFIX)?;
        let key_auth = self.challenges.get(token)?;
        tracing::info!(token, "🧩 answering ACME HTTP-01 challenge");
        Some(
            http::Response::builder()
                .status(http::StatusCode::OK)
                .header(http::header::CONTENT_TYPE, "text/plain")
                .body(Bytes::from(key_auth))
                .expect("static response parts are valid"),
        )
    }

    /// Begin certificate management for `names`.
    ///
    /// Internal subjects are issued synchronously (cheap, local); ACME
    /// subjects are handed to background tasks so the caller's listeners
    /// keep serving while orders are solved. Names already covered by a
    /// loaded certificate are skipped.
    pub async fn manage(&self, names: Vec<String>) -> Result<(), TlsError> {
        for name in names {
            if self.cache.has(&name) {
                tracing::debug!(domain = %name, "💾 certificate already loaded; not managing");
                continue;
            }
            let automation = self.automation.read();
            let Some(policy) = automation.policy_for(&name) else {
                tracing::warn!(domain = %name, "no automation policy applies; skipping");
                continue;
            };
            let Some(issuer) = policy.issuers.first().cloned() else {
                tracing::warn!(domain = %name, "automation policy has no issuers; skipping");
                continue;
            };
            drop(automation);

            match issuer {
                IssuerConfig::Internal(internal) => {
                    let cert = internal.issue(std::slice::from_ref(&name))?;
                    tracing::info!(domain = %name, "✅ issued internal certificate");
                    self.cache.insert(cert);
                }
                IssuerConfig::Acme(acme) => {
                    let cache = self.cache.clone();
                    let challenges = self.challenges.clone();
                    let domain = name.clone();
                    tokio::spawn(async move {
                        match acme.issue(std::slice::from_ref(&domain), challenges).await {
                            Ok(cert) => {
                                tracing::info!(domain = %domain, "🎉 obtained certificate");
                                cache.insert(cert);
                            }
                            Err(err) => {
                                tracing::error!(domain = %domain, error = %err, "❌ certificate issuance failed");
                            }
                        }
                    });
                }
            }
        }
        Ok(())
    }
}
