//! Protocol matcher.

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::RequestCtx;
use crate::error::Result;
use crate::module::Registry;

use super::RequestMatcher;

/// Matches the transport-level protocol of the request: `http`, `https`,
/// or `grpc` (an HTTP/2 request with a gRPC content type).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchProtocol {
    protocol: String,
}

impl MatchProtocol {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
        }
    }
}

impl RequestMatcher for MatchProtocol {
    fn is_match(&self, r: &mut RequestCtx) -> bool {
        match self.protocol.as_str() {
            "http" => r.tls.is_none(),
            "https" => r.tls.is_some(),
            "grpc" => r
                .parts
                .headers
                .get(http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.starts_with("application/grpc")),
            _ => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn ctor(
    config: serde_json::Value,
    _registry: &Registry,
) -> Result<Arc<dyn RequestMatcher>> {
    let m: MatchProtocol = super::decode("protocol", config)?;
    Ok(Arc::new(m))
}
