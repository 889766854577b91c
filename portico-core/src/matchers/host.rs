//! Host matcher.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::RequestCtx;
use crate::error::{Error, Result};
use crate::module::Registry;

use super::RequestMatcher;

/// Past this many patterns the list is partitioned and the exact names
/// binary-searched instead of scanned.
const SORT_THRESHOLD: usize = 32;

/// Case-insensitive host matching with label wildcards.
///
/// A `*` label matches exactly one DNS label: `*.example.com` matches
/// `foo.example.com` but neither `example.com` nor `a.b.example.com`.
/// Patterns containing placeholders are expanded per request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchHost {
    patterns: Vec<String>,

    /// Patterns below this index are fuzzy (wildcards or placeholders);
    /// from here on the list is sorted exact names. Only meaningful once
    /// `sorted` is set.
    #[serde(skip)]
    exact_from: usize,
    #[serde(skip)]
    sorted: bool,
}

impl MatchHost {
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            patterns,
            exact_from: 0,
            sorted: false,
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn provision(&mut self) -> Result<()> {
        for p in &mut self.patterns {
            *p = p.trim().to_ascii_lowercase();
        }
        let mut seen = HashSet::new();
        for p in &self.patterns {
            if !seen.insert(p.as_str()) {
                return Err(Error::Provision(format!(
                    "host matcher has duplicate pattern {p:?}"
                )));
            }
        }
        if self.patterns.len() > SORT_THRESHOLD {
            let (mut fuzzy, mut exact): (Vec<String>, Vec<String>) = self
                .patterns
                .drain(..)
                .partition(|p| is_fuzzy(p));
            exact.sort();
            self.exact_from = fuzzy.len();
            fuzzy.extend(exact);
            self.patterns = fuzzy;
            self.sorted = true;
        }
        Ok(())
    }

    fn pattern_matches(pattern: &str, host: &str, r: &RequestCtx) -> bool {
        if pattern.contains('{') {
            let expanded = r.replace_all(pattern, "");
            host_labels_match(&expanded, host)
        } else {
            host_labels_match(pattern, host)
        }
    }
}

fn is_fuzzy(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('{')
}

fn host_labels_match(pattern: &str, host: &str) -> bool {
    if pattern == host {
        return true;
    }
    if !pattern.contains('*') {
        return false;
    }
    let pat: Vec<&str> = pattern.split('.').collect();
    let hst: Vec<&str> = host.split('.').collect();
    if pat.len() != hst.len() {
        return false;
    }
    pat.iter().zip(hst.iter()).all(|(p, h)| *p == "*" || p == h)
}

impl RequestMatcher for MatchHost {
    fn is_match(&self, r: &mut RequestCtx) -> bool {
        let host = r.hostname().to_ascii_lowercase();
        let host = host.trim_end_matches('.');

        if self.sorted {
            for pattern in &self.patterns[..self.exact_from] {
                if Self::pattern_matches(pattern, host, r) {
                    return true;
                }
            }
            self.patterns[self.exact_from..]
                .binary_search_by(|p| p.as_str().cmp(host))
                .is_ok()
        } else {
            self.patterns
                .iter()
                .any(|pattern| Self::pattern_matches(pattern, host, r))
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn ctor(
    config: serde_json::Value,
    _registry: &Registry,
) -> Result<Arc<dyn RequestMatcher>> {
    let mut m: MatchHost = super::decode("host", config)?;
    m.provision()?;
    Ok(Arc::new(m))
}
