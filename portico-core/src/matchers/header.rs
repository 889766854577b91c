//! Header matchers: literal values and regex variants.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::RequestCtx;
use crate::error::Result;
use crate::module::Registry;

use super::regexp::MatchRegexp;
use super::RequestMatcher;

/// Field → accepted values. An empty value list (or `*`) means the field
/// only has to be present; values may carry a leading or trailing `*` for
/// suffix/prefix matching. All listed fields must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchHeader {
    fields: HashMap<String, Vec<String>>,
}

impl MatchHeader {
    pub fn new(fields: HashMap<String, Vec<String>>) -> Self {
        Self { fields }
    }

    fn value_matches(pattern: &str, value: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            return value.starts_with(prefix);
        }
        if let Some(suffix) = pattern.strip_prefix('*') {
            return value.ends_with(suffix);
        }
        pattern == value
    }
}

impl RequestMatcher for MatchHeader {
    fn is_match(&self, r: &mut RequestCtx) -> bool {
        self.fields.iter().all(|(field, accepted)| {
            let mut values = r
                .parts
                .headers
                .get_all(field.as_str())
                .iter()
                .filter_map(|v| v.to_str().ok());
            if accepted.is_empty() {
                return values.next().is_some();
            }
            values.any(|value| accepted.iter().any(|p| Self::value_matches(p, value)))
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Field → regex, with captures exported like `path_regexp`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchHeaderRegexp {
    fields: HashMap<String, MatchRegexp>,
}

impl MatchHeaderRegexp {
    pub fn provision(&mut self) -> Result<()> {
        for re in self.fields.values_mut() {
            re.provision()?;
        }
        Ok(())
    }
}

impl RequestMatcher for MatchHeaderRegexp {
    fn is_match(&self, r: &mut RequestCtx) -> bool {
        for (field, re) in &self.fields {
            let Some(value) = r
                .parts
                .headers
                .get(field.as_str())
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
            else {
                return false;
            };
            if !re.match_value(&value, &mut r.repl) {
                return false;
            }
        }
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn ctor(
    config: serde_json::Value,
    _registry: &Registry,
) -> Result<Arc<dyn RequestMatcher>> {
    let m: MatchHeader = super::decode("header", config)?;
    Ok(Arc::new(m))
}

pub(crate) fn regexp_ctor(
    config: serde_json::Value,
    _registry: &Registry,
) -> Result<Arc<dyn RequestMatcher>> {
    let mut m: MatchHeaderRegexp = super::decode("header_regexp", config)?;
    m.provision()?;
    Ok(Arc::new(m))
}
