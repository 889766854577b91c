//! Static response handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

use crate::context::RequestCtx;
use crate::error::{HandlerError, Result};
use crate::handler::{MiddlewareHandler, Next};
use crate::module::Registry;
use crate::response::ResponseWriter;

fn is_false(b: &bool) -> bool {
    !b
}

/// Responds with a fixed status, headers, and body. Every field supports
/// placeholders, expanded per request. A responder: does not call next.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct StaticResponse {
    /// Status to write; a string is placeholder-expanded first. Defaults
    /// to 200.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<StatusField>,

    /// Header field → values to set.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,

    /// Close the connection after writing the response.
    #[serde(default, skip_serializing_if = "is_false")]
    pub close: bool,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusField {
    Code(u16),
    Expr(String),
}

impl StaticResponse {
    fn status(&self, r: &RequestCtx) -> std::result::Result<StatusCode, HandlerError> {
        let code = match &self.status_code {
            None => 200,
            Some(StatusField::Code(code)) => *code,
            Some(StatusField::Expr(expr)) => {
                let expanded = r.replace_all(expr, "");
                expanded.parse::<u16>().map_err(|_| {
                    HandlerError::new(500, format!("invalid status code expression {expr:?}"))
                })?
            }
        };
        StatusCode::from_u16(code)
            .map_err(|_| HandlerError::new(500, format!("invalid status code {code}")))
    }
}

#[async_trait]
impl MiddlewareHandler for StaticResponse {
    async fn serve(
        &self,
        w: &mut dyn ResponseWriter,
        r: &mut RequestCtx,
        _next: Next<'_>,
    ) -> std::result::Result<(), HandlerError> {
        let status = self.status(r)?;

        // expand header values against the response headers written so far
        let mut expanded: Vec<(HeaderName, HeaderValue)> = Vec::new();
        for (field, values) in &self.headers {
            let name = HeaderName::from_bytes(field.as_bytes())
                .map_err(|_| HandlerError::new(500, format!("invalid header field {field:?}")))?;
            for value in values {
                let value = r.replace_with_response(value, "", w.headers());
                let value = HeaderValue::from_str(&value).map_err(|_| {
                    HandlerError::new(500, format!("invalid header value for {field}"))
                })?;
                expanded.push((name.clone(), value));
            }
        }
        for (name, value) in expanded {
            w.headers_mut().append(name, value);
        }
        if self.close {
            w.headers_mut().insert(
                http::header::CONNECTION,
                HeaderValue::from_static("close"),
            );
        }

        w.write_header(status);
        if !self.body.is_empty() {
            let body = r.replace_all(&self.body, "");
            w.write(body.as_bytes());
        }
        Ok(())
    }
}

pub(crate) fn ctor(
    config: serde_json::Value,
    _registry: &Registry,
) -> Result<Arc<dyn MiddlewareHandler>> {
    let h: StaticResponse = super::decode("static_response", config)?;
    Ok(Arc::new(h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testutil::ctx;
    use crate::response::ResponseBuffer;

    async fn serve(h: &StaticResponse, r: &mut RequestCtx) -> ResponseBuffer {
        let mut w = ResponseBuffer::new();
        h.serve(&mut w, r, Next::new(&[])).await.unwrap();
        w
    }

    #[tokio::test]
    async fn placeholders_expand_in_headers_and_body() {
        let h: StaticResponse = serde_json::from_str(
            r#"{
                "status_code": 308,
                "headers": {"Location": ["https://{http.request.host}{http.request.uri}"]},
                "close": true
            }"#,
        )
        .unwrap();

        let mut r = ctx("GET", "/path?q=1", "example.com");
        let w = serve(&h, &mut r).await;
        assert_eq!(w.status(), Some(StatusCode::PERMANENT_REDIRECT));
        assert_eq!(
            w.headers().get(http::header::LOCATION).unwrap(),
            "https://example.com/path?q=1"
        );
        assert_eq!(w.headers().get(http::header::CONNECTION).unwrap(), "close");
    }

    #[tokio::test]
    async fn status_expression_is_expanded() {
        let h: StaticResponse = serde_json::from_str(
            r#"{"status_code": "{http.error.status_code}", "body": "{http.error.message}"}"#,
        )
        .unwrap();

        let mut r = ctx("GET", "/", "example.com");
        r.attach_error(HandlerError::new(503, "overloaded"));
        let w = serve(&h, &mut r).await;
        assert_eq!(w.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        let resp = w.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn defaults_to_empty_200() {
        let h = StaticResponse::default();
        let mut r = ctx("GET", "/", "example.com");
        let w = serve(&h, &mut r).await;
        assert_eq!(w.status(), Some(StatusCode::OK));
        assert_eq!(w.size(), 0);
    }
}
