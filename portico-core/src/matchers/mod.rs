//! Request matchers.
//!
//! A matcher is a pure predicate over a request; the only state it may
//! touch is the request's replacer (regex matchers record their captures
//! there). A [`MatcherSet`] ANDs its members together, short-circuiting on
//! the first miss; a route carries an OR of matcher sets.

pub mod header;
pub mod host;
pub mod method;
pub mod not;
pub mod path;
pub mod protocol;
pub mod query;
pub mod regexp;
pub mod remote_ip;

use std::any::Any;
use std::sync::Arc;

use crate::context::RequestCtx;
use crate::error::{Error, Result};
use crate::module::Registry;

pub use header::{MatchHeader, MatchHeaderRegexp};
pub use host::MatchHost;
pub use method::MatchMethod;
pub use not::MatchNot;
pub use path::MatchPath;
pub use protocol::MatchProtocol;
pub use query::MatchQuery;
pub use regexp::{MatchPathRegexp, MatchRegexp};
pub use remote_ip::MatchRemoteIp;

/// A provisioned request predicate.
pub trait RequestMatcher: Send + Sync {
    /// Whether the request matches. May record capture values in the
    /// request's replacer; must have no other side effect.
    fn is_match(&self, r: &mut RequestCtx) -> bool;

    /// Downcast support (the auto-HTTPS planner inspects host matchers).
    fn as_any(&self) -> &dyn Any;
}

/// AND-conjunction of matchers.
#[derive(Clone, Default)]
pub struct MatcherSet {
    pub matchers: Vec<Arc<dyn RequestMatcher>>,
}

impl MatcherSet {
    pub fn matches(&self, r: &mut RequestCtx) -> bool {
        self.matchers.iter().all(|m| m.is_match(r))
    }

    /// Find a matcher of concrete type `M` in this set.
    pub fn get<M: 'static>(&self) -> Option<&M> {
        self.matchers.iter().find_map(|m| m.as_any().downcast_ref())
    }
}

/// A matcher set as it appears in JSON: matcher-module name → raw config.
pub type RawMatcherSet = serde_json::Map<String, serde_json::Value>;

/// Load and provision every matcher of a raw set.
pub fn provision_set(raw: &RawMatcherSet, registry: &Registry) -> Result<MatcherSet> {
    let mut set = MatcherSet::default();
    for (name, config) in raw {
        set.matchers
            .push(registry.load_matcher(name, config.clone())?);
    }
    Ok(set)
}

/// Decode a matcher config, mapping serde failures to provision errors.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    name: &str,
    config: serde_json::Value,
) -> Result<T> {
    serde_json::from_value(config)
        .map_err(|e| Error::Provision(format!("decoding {name} matcher: {e}")))
}

pub(crate) fn register_builtins(registry: &Registry) {
    registry.register_matcher("host", host::ctor);
    registry.register_matcher("path", path::ctor);
    registry.register_matcher("path_regexp", regexp::path_ctor);
    registry.register_matcher("header", header::ctor);
    registry.register_matcher("header_regexp", header::regexp_ctor);
    registry.register_matcher("method", method::ctor);
    registry.register_matcher("query", query::ctor);
    registry.register_matcher("protocol", protocol::ctor);
    registry.register_matcher("remote_ip", remote_ip::ctor);
    registry.register_matcher("not", not::ctor);
}
