//! Subroute handler: a route list embedded as middleware.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RequestCtx;
use crate::error::{HandlerError, Result};
use crate::handler::{MiddlewareHandler, Next};
use crate::module::Registry;
use crate::response::ResponseWriter;
use crate::routes::RouteList;

/// Compiles its embedded route list with the outer chain's `next` as the
/// terminator, so an inner chain that declines to respond falls through
/// to the rest of the outer chain. Carries its own error routes; when the
/// inner chain errors and they exist, they run with the error attached to
/// the request (`http.error.*`).
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Subroute {
    #[serde(default, skip_serializing_if = "RouteList::is_empty")]
    pub routes: RouteList,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<ErrorRoutes>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ErrorRoutes {
    #[serde(default, skip_serializing_if = "RouteList::is_empty")]
    pub routes: RouteList,
}

impl Subroute {
    pub fn provision(&mut self, registry: &Registry) -> Result<()> {
        self.routes.provision_matchers(registry)?;
        self.routes.provision_handlers(registry)?;
        if let Some(errors) = &mut self.errors {
            errors.routes.provision_matchers(registry)?;
            errors.routes.provision_handlers(registry)?;
        }
        Ok(())
    }
}

#[async_trait]
impl MiddlewareHandler for Subroute {
    async fn serve(
        &self,
        w: &mut dyn ResponseWriter,
        r: &mut RequestCtx,
        next: Next<'_>,
    ) -> std::result::Result<(), HandlerError> {
        let chain = self.routes.compile(r);
        let result = Next::with_tail(&chain, &next).serve(w, r).await;

        match result {
            Err(err) if !err.is_rehandle() => {
                let Some(errors) = &self.errors else {
                    return Err(err);
                };
                tracing::debug!(error = %err, id = %err.id, "running subroute error routes");
                r.attach_error(err);
                let chain = errors.routes.compile(r);
                Next::new(&chain).serve(w, r).await
            }
            other => other,
        }
    }
}

pub(crate) fn ctor(
    config: serde_json::Value,
    registry: &Registry,
) -> Result<Arc<dyn MiddlewareHandler>> {
    let mut h: Subroute = super::decode("subroute", config)?;
    h.provision(registry)?;
    Ok(Arc::new(h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testutil::ctx;
    use crate::response::ResponseBuffer;
    use http::StatusCode;

    fn subroute(json: &str) -> Subroute {
        let mut h: Subroute = serde_json::from_str(json).unwrap();
        h.provision(Registry::global()).unwrap();
        h
    }

    #[tokio::test]
    async fn inner_routes_run_and_fall_through_to_outer_next() {
        let h = subroute(
            r#"{"routes": [
                {"match": [{"path": ["/inner"]}], "handle": [
                    {"handler": "static_response", "status_code": 202}
                ]}
            ]}"#,
        );

        // matching inner route responds
        let mut w = ResponseBuffer::new();
        let mut r = ctx("GET", "/inner", "example.com");
        h.serve(&mut w, &mut r, Next::new(&[])).await.unwrap();
        assert_eq!(w.status(), Some(StatusCode::ACCEPTED));

        // non-matching request falls through to the outer chain
        let outer: Vec<Arc<dyn MiddlewareHandler>> = vec![Arc::new(
            crate::handlers::StaticResponse {
                status_code: Some(crate::handlers::static_response::StatusField::Code(299)),
                ..Default::default()
            },
        )];
        let mut w = ResponseBuffer::new();
        let mut r = ctx("GET", "/other", "example.com");
        h.serve(&mut w, &mut r, Next::new(&outer)).await.unwrap();
        assert_eq!(w.status().map(|s| s.as_u16()), Some(299));
    }

    #[tokio::test]
    async fn error_routes_see_the_error_placeholders() {
        let h = subroute(
            r#"{
                "routes": [
                    {"handle": [{"handler": "static_response", "status_code": "nonsense"}]}
                ],
                "errors": {"routes": [
                    {"handle": [{"handler": "static_response",
                                 "status_code": "{http.error.status_code}",
                                 "body": "{http.error.message}"}]}
                ]}
            }"#,
        );

        let mut w = ResponseBuffer::new();
        let mut r = ctx("GET", "/", "example.com");
        h.serve(&mut w, &mut r, Next::new(&[])).await.unwrap();
        assert_eq!(w.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(r.error.is_some());
    }

    #[tokio::test]
    async fn errors_propagate_without_error_routes() {
        let h = subroute(
            r#"{"routes": [
                {"handle": [{"handler": "static_response", "status_code": "nonsense"}]}
            ]}"#,
        );

        let mut w = ResponseBuffer::new();
        let mut r = ctx("GET", "/", "example.com");
        let err = h
            .serve(&mut w, &mut r, Next::new(&[]))
            .await
            .unwrap_err();
        assert_eq!(err.status_or_default(), 500);
    }
}
