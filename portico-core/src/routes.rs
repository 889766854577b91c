//! Routes and per-request chain compilation.
//!
//! A route pairs an OR-list of matcher sets with an ordered handler list,
//! plus a `group` exclusivity tag and a `terminal` flag. Matchers and
//! handlers are decoded from their raw JSON module maps exactly once,
//! during provisioning; compiling a route list against a request is a
//! cheap walk that collects the matching routes' already-provisioned
//! handlers into one chain.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::RequestCtx;
use crate::error::{Error, Result};
use crate::handler::MiddlewareHandler;
use crate::matchers::{provision_set, MatcherSet, RawMatcherSet};
use crate::module::Registry;

fn is_false(b: &bool) -> bool {
    !b
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Route {
    /// OR-list of matcher sets; no sets means the route always matches.
    #[serde(rename = "match", default, skip_serializing_if = "Vec::is_empty")]
    pub matcher_sets: Vec<RawMatcherSet>,

    /// Handler module objects, each selected by its `handler` field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handle: Vec<serde_json::Value>,

    /// Exclusivity tag: at most one route per group applies to a request.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,

    /// Once a terminal route applies, no later route is considered.
    #[serde(default, skip_serializing_if = "is_false")]
    pub terminal: bool,

    #[serde(skip)]
    pub(crate) compiled_matchers: Vec<MatcherSet>,
    #[serde(skip)]
    pub(crate) compiled_handlers: Vec<Arc<dyn MiddlewareHandler>>,
    #[serde(skip)]
    pub(crate) matchers_ready: bool,
    #[serde(skip)]
    pub(crate) handlers_ready: bool,
}

impl Route {
    /// Decode and provision this route's matcher modules. Idempotent.
    pub fn provision_matchers(&mut self, registry: &Registry) -> Result<()> {
        if self.matchers_ready {
            return Ok(());
        }
        self.compiled_matchers = self
            .matcher_sets
            .iter()
            .map(|raw| provision_set(raw, registry))
            .collect::<Result<_>>()?;
        self.matchers_ready = true;
        Ok(())
    }

    /// Decode and provision this route's handler modules. Idempotent.
    pub fn provision_handlers(&mut self, registry: &Registry) -> Result<()> {
        if self.handlers_ready {
            return Ok(());
        }
        let mut handlers = Vec::with_capacity(self.handle.len());
        for raw in &self.handle {
            let name = raw
                .get("handler")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::Provision(format!("handler object missing \"handler\" field: {raw}"))
                })?
                .to_string();
            handlers.push(registry.load_handler(&name, raw.clone())?);
        }
        self.compiled_handlers = handlers;
        self.handlers_ready = true;
        Ok(())
    }

    /// Whether the route applies to the request: no sets, or any set.
    pub fn matches(&self, r: &mut RequestCtx) -> bool {
        if self.compiled_matchers.is_empty() {
            return true;
        }
        self.compiled_matchers.iter().any(|set| set.matches(r))
    }

    /// The provisioned matcher sets (empty until provisioning).
    pub fn matcher_sets(&self) -> &[MatcherSet] {
        &self.compiled_matchers
    }
}

/// An ordered list of routes.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteList(pub Vec<Route>);

impl RouteList {
    pub fn iter(&self) -> std::slice::Iter<'_, Route> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Route> {
        self.0.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, route: Route) {
        self.0.push(route);
    }

    pub fn insert(&mut self, index: usize, route: Route) {
        self.0.insert(index, route);
    }

    pub fn retain(&mut self, f: impl FnMut(&Route) -> bool) {
        self.0.retain(f);
    }

    pub fn provision_matchers(&mut self, registry: &Registry) -> Result<()> {
        for route in &mut self.0 {
            route.provision_matchers(registry)?;
        }
        Ok(())
    }

    pub fn provision_handlers(&mut self, registry: &Registry) -> Result<()> {
        for route in &mut self.0 {
            route.provision_handlers(registry)?;
        }
        Ok(())
    }

    /// Compile the list against a request: walk in declaration order,
    /// evaluate matchers, honor group exclusivity, stop after a terminal
    /// route. The result is the handler chain to execute.
    pub fn compile(&self, r: &mut RequestCtx) -> Vec<Arc<dyn MiddlewareHandler>> {
        let mut chain = Vec::new();
        let mut groups: HashSet<&str> = HashSet::new();
        for route in &self.0 {
            if !route.matches(r) {
                continue;
            }
            if !route.group.is_empty() && !groups.insert(route.group.as_str()) {
                continue;
            }
            chain.extend(route.compiled_handlers.iter().cloned());
            if route.terminal {
                break;
            }
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testutil::ctx;
    use crate::handler::Next;
    use crate::response::{ResponseBuffer, ResponseWriter};

    fn routes(json: &str) -> RouteList {
        let mut list: RouteList = serde_json::from_str(json).unwrap();
        let registry = Registry::global();
        list.provision_matchers(registry).unwrap();
        list.provision_handlers(registry).unwrap();
        list
    }

    async fn run(list: &RouteList, r: &mut RequestCtx) -> ResponseBuffer {
        let mut w = ResponseBuffer::new();
        let chain = list.compile(r);
        Next::new(&chain).serve(&mut w, r).await.unwrap();
        w
    }

    #[tokio::test]
    async fn declaration_order_is_preserved() {
        let list = routes(
            r#"[
                {"match": [{"path": ["/a"]}], "handle": [
                    {"handler": "vars", "first": "yes"}
                ]},
                {"handle": [
                    {"handler": "static_response", "status_code": 200, "body": "{http.vars.first}"}
                ]}
            ]"#,
        );

        let mut r = ctx("GET", "/a", "example.com");
        let w = run(&list, &mut r).await;
        let resp = w.into_response();
        assert_eq!(resp.status(), http::StatusCode::OK);
        // the vars handler ran before the responder
        assert_eq!(r.get_var("first"), Some("yes"));
    }

    #[tokio::test]
    async fn terminal_stops_the_walk() {
        let list = routes(
            r#"[
                {"terminal": true, "handle": [
                    {"handler": "static_response", "status_code": 201}
                ]},
                {"handle": [
                    {"handler": "static_response", "status_code": 500}
                ]}
            ]"#,
        );

        let mut r = ctx("GET", "/", "example.com");
        let w = run(&list, &mut r).await;
        assert_eq!(w.status(), Some(http::StatusCode::CREATED));
    }

    #[tokio::test]
    async fn group_exclusivity_first_match_wins() {
        let list = routes(
            r#"[
                {"group": "g", "match": [{"path": ["/x/*"]}], "handle": [
                    {"handler": "vars", "winner": "one"}
                ]},
                {"group": "g", "handle": [
                    {"handler": "vars", "winner": "two"}
                ]}
            ]"#,
        );

        let mut r = ctx("GET", "/x/1", "example.com");
        run(&list, &mut r).await;
        assert_eq!(r.get_var("winner"), Some("one"));

        let mut r = ctx("GET", "/other", "example.com");
        run(&list, &mut r).await;
        assert_eq!(r.get_var("winner"), Some("two"));
    }

    #[tokio::test]
    async fn routes_without_matchers_always_apply() {
        let list = routes(
            r#"[{"handle": [{"handler": "static_response", "status_code": 418}]}]"#,
        );
        let mut r = ctx("GET", "/anything", "example.com");
        let w = run(&list, &mut r).await;
        assert_eq!(w.status(), Some(http::StatusCode::IM_A_TEAPOT));
    }

    #[test]
    fn provisioning_is_idempotent() {
        let registry = Registry::global();
        let mut list: RouteList = serde_json::from_str(
            r#"[{"match": [{"host": ["example.com"]}], "handle": [
                {"handler": "static_response", "status_code": 200}
            ]}]"#,
        )
        .unwrap();
        list.provision_matchers(registry).unwrap();
        let first = list.0[0].compiled_matchers.len();
        list.provision_matchers(registry).unwrap();
        assert_eq!(list.0[0].compiled_matchers.len(), first);
    }
}
