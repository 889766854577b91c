//! Module registry.
//!
//! Matchers and handlers are modules with namespaced string IDs
//! (`http.matchers.host`, `http.handlers.static_response`). Configuration
//! references them by the last label inside JSON module maps; the registry
//! maps IDs to constructors that decode raw JSON into provisioned trait
//! objects. Third parties register additional modules at startup through
//! [`Registry::register_matcher`] / [`Registry::register_handler`].

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::handler::MiddlewareHandler;
use crate::matchers::RequestMatcher;

/// Constructor for a matcher module: raw JSON config in, provisioned
/// matcher out.
pub type MatcherCtor =
    fn(serde_json::Value, &Registry) -> Result<Arc<dyn RequestMatcher>>;

/// Constructor for a handler module.
pub type HandlerCtor =
    fn(serde_json::Value, &Registry) -> Result<Arc<dyn MiddlewareHandler>>;

const MATCHER_NAMESPACE: &str = "http.matchers.";
const HANDLER_NAMESPACE: &str = "http.handlers.";

#[derive(Default)]
pub struct Registry {
    matchers: RwLock<HashMap<String, MatcherCtor>>,
    handlers: RwLock<HashMap<String, HandlerCtor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry with the built-in modules registered.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let registry = Registry::new();
            crate::matchers::register_builtins(&registry);
            crate::handlers::register_builtins(&registry);
            registry
        })
    }

    /// Register a matcher module under `http.matchers.<name>`.
    pub fn register_matcher(&self, name: &str, ctor: MatcherCtor) {
        let id = format!("{MATCHER_NAMESPACE}{name}");
        tracing::debug!(module = %id, "registering module");
        self.matchers.write().insert(id, ctor);
    }

    /// Register a handler module under `http.handlers.<name>`.
    pub fn register_handler(&self, name: &str, ctor: HandlerCtor) {
        let id = format!("{HANDLER_NAMESPACE}{name}");
        tracing::debug!(module = %id, "registering module");
        self.handlers.write().insert(id, ctor);
    }

    /// Instantiate the matcher module named by a module-map key.
    pub fn load_matcher(
        &self,
        name: &str,
        config: serde_json::Value,
    ) -> Result<Arc<dyn RequestMatcher>> {
        let id = format!("{MATCHER_NAMESPACE}{name}");
        let ctor = *self
            .matchers
            .read()
            .get(&id)
            .ok_or_else(|| Error::Provision(format!("unknown matcher module {id:?}")))?;
        ctor(config, self)
    }

    /// Instantiate the handler module named by its `handler` field.
    pub fn load_handler(
        &self,
        name: &str,
        config: serde_json::Value,
    ) -> Result<Arc<dyn MiddlewareHandler>> {
        let id = format!("{HANDLER_NAMESPACE}{name}");
        let ctor = *self
            .handlers
            .read()
            .get(&id)
            .ok_or_else(|| Error::Provision(format!("unknown handler module {id:?}")))?;
        ctor(config, self)
    }

    /// All registered module IDs, sorted.
    pub fn module_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .matchers
            .read()
            .keys()
            .chain(self.handlers.read().keys())
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
