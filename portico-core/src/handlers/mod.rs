//! Built-in handler modules.
//!
//! Only the handlers the routing core itself needs live here; everything
//! else (files, proxying, auth, …) is expected to be registered by other
//! crates through the module registry.

pub mod static_response;
pub mod subroute;
pub mod vars;

use crate::module::Registry;

pub use static_response::StaticResponse;
pub use subroute::Subroute;
pub use vars::Vars;

pub(crate) fn register_builtins(registry: &Registry) {
    registry.register_handler("static_response", static_response::ctor);
    registry.register_handler("subroute", subroute::ctor);
    registry.register_handler("vars", vars::ctor);
}

/// Decode a handler config, mapping serde failures to provision errors.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    name: &str,
    config: serde_json::Value,
) -> crate::error::Result<T> {
    serde_json::from_value(config)
        .map_err(|e| crate::error::Error::Provision(format!("decoding {name} handler: {e}")))
}
