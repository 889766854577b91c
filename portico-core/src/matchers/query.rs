//! Query-string matcher.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::RequestCtx;
use crate::error::Result;
use crate::module::Registry;

use super::RequestMatcher;

/// Parameter → accepted values. An empty list or `*` requires presence
/// only; all listed parameters must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchQuery {
    params: HashMap<String, Vec<String>>,
}

impl RequestMatcher for MatchQuery {
    fn is_match(&self, r: &mut RequestCtx) -> bool {
        let query = r.parts.uri.query().unwrap_or_default();
        let pairs: Vec<(&str, &str)> = query
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|p| p.split_once('=').unwrap_or((p, "")))
            .collect();

        self.params.iter().all(|(name, accepted)| {
            pairs.iter().any(|(k, v)| {
                *k == name.as_str()
                    && (accepted.is_empty()
                        || accepted.iter().any(|a| a.as_str() == "*" || a.as_str() == *v))
            })
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn ctor(
    config: serde_json::Value,
    _registry: &Registry,
) -> Result<Arc<dyn RequestMatcher>> {
    let m: MatchQuery = super::decode("query", config)?;
    Ok(Arc::new(m))
}
