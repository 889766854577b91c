//! Method matcher.

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::RequestCtx;
use crate::error::Result;
use crate::module::Registry;

use super::RequestMatcher;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchMethod {
    methods: Vec<String>,
}

impl MatchMethod {
    pub fn provision(&mut self) -> Result<()> {
        for m in &mut self.methods {
            *m = m.to_ascii_uppercase();
        }
        Ok(())
    }
}

impl RequestMatcher for MatchMethod {
    fn is_match(&self, r: &mut RequestCtx) -> bool {
        self.methods.iter().any(|m| m.as_str() == r.parts.method.as_str())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn ctor(
    config: serde_json::Value,
    _registry: &Registry,
) -> Result<Arc<dyn RequestMatcher>> {
    let mut m: MatchMethod = super::decode("method", config)?;
    m.provision()?;
    Ok(Arc::new(m))
}
