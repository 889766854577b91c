//! Automation policies: which issuer obtains certificates for which subjects.

use serde::{Deserialize, Serialize};

use crate::acme::AcmeIssuer;
use crate::internal::InternalIssuer;
use crate::TlsError;

/// Certificate automation configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<AutomationPolicy>,
}

impl AutomationConfig {
    /// The policy governing `name`: the first policy whose subject list
    /// covers the name, falling back to the first catch-all (empty
    /// subject list).
    pub fn policy_for(&self, name: &str) -> Option<&AutomationPolicy> {
        self.policies
            .iter()
            .find(|p| p.subjects.iter().any(|s| subject_matches(s, name)))
            .or_else(|| self.policies.iter().find(|p| p.is_catch_all()))
    }

    /// Whether a non-catch-all policy explicitly names `name`.
    pub fn has_explicit_policy_for(&self, name: &str) -> bool {
        self.policies
            .iter()
            .any(|p| !p.is_catch_all() && p.subjects.iter().any(|s| subject_matches(s, name)))
    }

    pub fn validate(&self) -> Result<(), TlsError> {
        for policy in &self.policies {
            if !policy.is_catch_all() && policy.issuers.is_empty() {
                return Err(TlsError::Config(format!(
                    "automation policy for {:?} has no issuers",
                    policy.subjects
                )));
            }
            for issuer in &policy.issuers {
                if let IssuerConfig::Acme(acme) = issuer {
                    acme.check()?;
                }
            }
        }
        Ok(())
    }
}

/// A (subject list, issuer chain) pair. An empty subject list makes the
/// policy a catch-all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationPolicy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issuers: Vec<IssuerConfig>,

    /// Set on policies the auto-HTTPS planner synthesized, so a replan can
    /// strip them before inserting fresh ones.
    #[serde(skip)]
    pub synthesized: bool,
}

impl AutomationPolicy {
    pub fn is_catch_all(&self) -> bool {
        self.subjects.is_empty()
    }

    /// The default base policy: a catch-all backed by the default ACME CA.
    pub fn base_acme() -> Self {
        Self {
            subjects: Vec::new(),
            issuers: vec![IssuerConfig::Acme(AcmeIssuer::default())],
            synthesized: false,
        }
    }
}

/// A certificate issuer, selected by its `module` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "module", rename_all = "snake_case")]
pub enum IssuerConfig {
    Acme(AcmeIssuer),
    Internal(InternalIssuer),
}

/// Label-wise subject match: `*` covers exactly one DNS label.
///
/// Used both for policy subjects and certificate SANs, so a policy for
/// `*.example.com` governs `api.example.com` but not `example.com` or
/// `a.b.example.com`.
pub fn subject_matches(pattern: &str, name: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let name = name.to_ascii_lowercase();
    if pattern == name {
        return true;
    }
    if !pattern.contains('*') {
        return false;
    }
    let pat_labels: Vec<&str> = pattern.split('.').collect();
    let name_labels: Vec<&str> = name.split('.').collect();
    if pat_labels.len() != name_labels.len() {
        return false;
    }
    pat_labels
        .iter()
        .zip(name_labels.iter())
        .all(|(p, n)| *p == "*" || p == n)
}
