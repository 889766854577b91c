//! Vars handler: sets per-request variables.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RequestCtx;
use crate::error::{HandlerError, Result};
use crate::handler::{MiddlewareHandler, Next};
use crate::module::Registry;
use crate::response::ResponseWriter;

/// Middleware that stores key/value pairs in the request's variables map
/// (readable downstream as `{http.vars.<name>}`). Values are
/// placeholder-expanded at request time.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vars {
    values: HashMap<String, String>,
}

#[async_trait]
impl MiddlewareHandler for Vars {
    async fn serve(
        &self,
        w: &mut dyn ResponseWriter,
        r: &mut RequestCtx,
        next: Next<'_>,
    ) -> std::result::Result<(), HandlerError> {
        for (key, value) in &self.values {
            let value = r.replace_all(value, "");
            r.set_var(key.clone(), value);
        }
        next.serve(w, r).await
    }
}

pub(crate) fn ctor(
    config: serde_json::Value,
    _registry: &Registry,
) -> Result<Arc<dyn MiddlewareHandler>> {
    // the module map carries the selector alongside the values
    let mut config = config;
    if let Some(obj) = config.as_object_mut() {
        obj.remove("handler");
    }
    let h: Vars = super::decode("vars", config)?;
    Ok(Arc::new(h))
}
