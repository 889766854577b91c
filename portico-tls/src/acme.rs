//! ACME issuer (RFC 8555) over instant-acme.
//!
//! 🔐 Solves HTTP-01 challenges through the shared [`ChallengeMap`]; the
//! HTTP core consults the same map when it intercepts
//! `/.well-known/acme-challenge/` requests, so the challenge solver never
//! needs its own listener on the HTTP port.

use std::collections::HashMap;
use std::sync::Arc;

use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, Identifier, NewAccount, NewOrder, OrderStatus,
    RetryPolicy,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cache::Certificate;
use crate::TlsError;

// MARK: - Constants

/// Path prefix of HTTP-01 challenge requests.
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// 🏭 Let's Encrypt production directory.
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// 🧪 Let's Encrypt staging directory (untrusted roots, for testing).
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

// MARK: - Challenge Map

/// In-memory HTTP-01 token map: token → key authorization.
#[derive(Clone, Default)]
pub struct ChallengeMap {
    tokens: Arc<RwLock<HashMap<String, String>>>,
}

impl ChallengeMap {
    pub fn put(&self, token: impl Into<String>, key_auth: impl Into<String>) {
        self.tokens.write().insert(token.into(), key_auth.into());
    }

    pub fn remove(&self, token: &str) {
        self.tokens.write().remove(token);
    }

    pub fn get(&self, token: &str) -> Option<String> {
        self.tokens.read().get(token).cloned()
    }
}

// MARK: - Issuer

/// ACME issuer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeIssuer {
    /// ACME directory URL.
    #[serde(default = "default_ca")]
    pub ca: String,

    /// Contact email for account registration and expiry notices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Port the HTTP-01 challenge is solved on. Filled in from the HTTP
    /// app's port during provisioning when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_http_port: Option<u16>,

    /// Port the TLS-ALPN-01 challenge is solved on. Filled in from the
    /// HTTP app's HTTPS port during provisioning when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_tlsalpn_port: Option<u16>,
}

fn default_ca() -> String {
    LETS_ENCRYPT_PRODUCTION.to_string()
}

impl Default for AcmeIssuer {
    fn default() -> Self {
        Self {
            ca: default_ca(),
            email: None,
            alternate_http_port: None,
            alternate_tlsalpn_port: None,
        }
    }
}

impl AcmeIssuer {
    /// Re-render derived state after config mutation; also the validation
    /// hook for this issuer.
    pub fn check(&self) -> Result<(), TlsError> {
        if !self.ca.starts_with("https://") {
            return Err(TlsError::Config(format!(
                "ACME directory must be an https URL, got {:?}",
                self.ca
            )));
        }
        Ok(())
    }

    /// Run the full order flow for `domains` and return the issued bundle.
    ///
    /// Workflow: account registration, order placement, HTTP-01 challenge
    /// deployment into `challenges`, readiness polling, finalization and
    /// certificate download.
    pub async fn issue(
        &self,
        domains: &[String],
        challenges: ChallengeMap,
    ) -> Result<Certificate, TlsError> {
        tracing::info!(ca = %self.ca, ?domains, "🔐 starting ACME order");

        let account = self.ensure_account().await?;

        let identifiers: Vec<Identifier> =
            domains.iter().map(|d| Identifier::Dns(d.clone())).collect();
        let mut order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(|e| TlsError::Acme(format!("creating order: {e}")))?;

        let mut deployed_tokens = Vec::new();
        let mut authorizations = order.authorizations();
        while let Some(auth_result) = authorizations.next().await {
            let mut auth = auth_result
                .map_err(|e| TlsError::Acme(format!("fetching authorization: {e}")))?;
            let domain = auth.identifier().to_string();

            if auth.status == AuthorizationStatus::Valid {
                tracing::debug!(domain = %domain, "✅ authorization already valid");
                continue;
            }

            let mut challenge = auth.challenge(ChallengeType::Http01).ok_or_else(|| {
                TlsError::Acme(format!("no HTTP-01 challenge offered for {domain}"))
            })?;

            let token = challenge.token.clone();
            challenges.put(&token, challenge.key_authorization().as_str());
            deployed_tokens.push(token);

            challenge
                .set_ready()
                .await
                .map_err(|e| TlsError::Acme(format!("marking challenge ready: {e}")))?;
            tracing::info!(domain = %domain, "🧩 HTTP-01 challenge deployed");
        }

        let retry = RetryPolicy::default();
        let state = order.poll_ready(&retry).await;

        for token in &deployed_tokens {
            challenges.remove(token);
        }

        let state = state.map_err(|e| TlsError::Acme(format!("polling order: {e}")))?;
        if state != OrderStatus::Ready && state != OrderStatus::Valid {
            return Err(TlsError::Acme(format!("order ended in state {state:?}")));
        }

        let key_pem = order
            .finalize()
            .await
            .map_err(|e| TlsError::Acme(format!("finalizing order: {e}")))?;
        let cert_pem = order
            .poll_certificate(&retry)
            .await
            .map_err(|e| TlsError::Acme(format!("downloading certificate: {e}")))?;

        tracing::info!(?domains, "🎉 certificate acquired");
        Certificate::from_pem(&cert_pem, &key_pem)
    }

    async fn ensure_account(&self) -> Result<Account, TlsError> {
        let contact: Vec<String> = self
            .email
            .as_ref()
            .map(|e| vec![format!("mailto:{e}")])
            .unwrap_or_default();
        let contact_refs: Vec<&str> = contact.iter().map(String::as_str).collect();

        let new_account = NewAccount {
            contact: &contact_refs,
            terms_of_service_agreed: true,
            only_return_existing: false,
        };

        let builder = Account::builder()
            .map_err(|e| TlsError::Acme(format!("initializing account builder: {e}")))?;
        let (account, _credentials) = builder
            .create(&new_account, self.ca.clone(), None)
            .await
            .map_err(|e| TlsError::Acme(format!("registering account: {e}")))?;
        Ok(account)
    }
}
