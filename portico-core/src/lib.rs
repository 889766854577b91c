//! Portico routing core.
//!
//! The HTTP serving heart of the Portico web server: request matchers and
//! per-request route compilation, the middleware chain, the placeholder
//! replacer, the automatic-HTTPS planner, and the server/app lifecycle.
//! Handler and matcher modules are discovered through the [`module`]
//! registry; the TLS subsystem is consumed through the narrow facade in
//! the `portico-tls` crate.

pub mod app;
pub mod autohttps;
pub mod context;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod listeners;
pub mod matchers;
pub mod module;
pub mod replacer;
pub mod response;
pub mod routes;
pub mod server;
pub mod util;

mod http3;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};

pub use app::App;
pub use autohttps::{AutoHttpsConfig, REDIR_SERVER_NAME};
pub use context::RequestCtx;
pub use error::{Error, HandlerError, Result};
pub use handler::{MiddlewareHandler, Next};
pub use listeners::NetworkAddress;
pub use module::Registry;
pub use replacer::Replacer;
pub use response::{ResponseBuffer, ResponseRecorder, ResponseWriter};
pub use routes::{Route, RouteList};
pub use server::Server;

/// Request body type carried through the handler chain.
pub type Body = BoxBody<Bytes, std::io::Error>;

/// An empty request body.
pub fn empty_body() -> Body {
    Full::new(Bytes::new())
        .map_err(std::io::Error::other)
        .boxed()
}

/// Portico version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
