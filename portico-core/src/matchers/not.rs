//! Negation matcher.

use std::any::Any;
use std::sync::Arc;

use crate::context::RequestCtx;
use crate::error::{Error, Result};
use crate::module::Registry;

use super::{provision_set, MatcherSet, RawMatcherSet, RequestMatcher};

/// Matches when none of its embedded matcher sets match. The config is a
/// matcher set object, or a list of them for an OR under the negation.
pub struct MatchNot {
    sets: Vec<MatcherSet>,
}

impl RequestMatcher for MatchNot {
    fn is_match(&self, r: &mut RequestCtx) -> bool {
        !self.sets.iter().any(|set| set.matches(r))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn ctor(
    config: serde_json::Value,
    registry: &Registry,
) -> Result<Arc<dyn RequestMatcher>> {
    let raw_sets: Vec<RawMatcherSet> = match config {
        serde_json::Value::Object(map) => vec![map],
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::Object(map) => Ok(map),
                other => Err(Error::Provision(format!(
                    "not matcher expects matcher-set objects, got {other}"
                ))),
            })
            .collect::<Result<_>>()?,
        other => {
            return Err(Error::Provision(format!(
                "not matcher expects an object or array, got {other}"
            )))
        }
    };

    let mut sets = Vec::with_capacity(raw_sets.len());
    for raw in &raw_sets {
        sets.push(provision_set(raw, registry)?);
    }
    Ok(Arc::new(MatchNot { sets }))
}
