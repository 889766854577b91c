//! Regex matching with capture export.

use std::any::Any;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::RequestCtx;
use crate::error::{Error, Result};
use crate::module::Registry;
use crate::replacer::Replacer;

use super::RequestMatcher;

/// A compiled regex with an optional name for its capture namespace.
///
/// On match, captures are recorded in the replacer under
/// `http.regexp.<name>.<N>` (numeric) and `http.regexp.<name>.<group>`
/// (named); an unnamed matcher uses `http.regexp.<N>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchRegexp {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub pattern: String,
    #[serde(skip)]
    compiled: Option<Regex>,
}

impl MatchRegexp {
    pub fn provision(&mut self) -> Result<()> {
        let re = Regex::new(&self.pattern)
            .map_err(|e| Error::Provision(format!("compiling pattern {:?}: {e}", self.pattern)))?;
        self.compiled = Some(re);
        Ok(())
    }

    /// Match `input`, recording captures on success.
    pub fn match_value(&self, input: &str, repl: &mut Replacer) -> bool {
        let re = self
            .compiled
            .as_ref()
            .expect("regexp matcher used before provisioning");
        let Some(caps) = re.captures(input) else {
            return false;
        };

        let prefix = if self.name.is_empty() {
            "http.regexp".to_string()
        } else {
            format!("http.regexp.{}", self.name)
        };
        for (i, cap) in caps.iter().enumerate() {
            if let Some(m) = cap {
                repl.set(format!("{prefix}.{i}"), m.as_str());
            }
        }
        for group in re.capture_names().flatten() {
            if let Some(m) = caps.name(group) {
                repl.set(format!("{prefix}.{group}"), m.as_str());
            }
        }
        true
    }
}

/// Path regex matcher (`path_regexp`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchPathRegexp(pub MatchRegexp);

impl RequestMatcher for MatchPathRegexp {
    fn is_match(&self, r: &mut RequestCtx) -> bool {
        let path = r.parts.uri.path().to_string();
        self.0.match_value(&path, &mut r.repl)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn path_ctor(
    config: serde_json::Value,
    _registry: &Registry,
) -> Result<Arc<dyn RequestMatcher>> {
    let mut m: MatchPathRegexp = super::decode("path_regexp", config)?;
    m.0.provision()?;
    Ok(Arc::new(m))
}
