//! Per-request context.
//!
//! A [`RequestCtx`] travels down the handler chain alongside the response
//! writer: request parts (mutable, so rewrite-style handlers can adjust the
//! URI before a rehandle), the connection facts, the per-request variables
//! map, and the [`Replacer`]. The HTTP placeholder namespace of the wire
//! contract is resolved lazily against the context's current state, which
//! is what makes placeholders late-bound across rewrites.

use std::collections::HashMap;
use std::net::SocketAddr;

use http::header;
use portico_tls::TlsInfo;

use crate::error::HandlerError;
use crate::replacer::Replacer;
use crate::Body;

pub struct RequestCtx {
    /// Request line, headers, extensions. `parts.uri` is mutated by
    /// rewriting handlers; matchers always see the current value.
    pub parts: http::request::Parts,
    /// Request body, taken by the first handler that consumes it.
    pub body: Option<Body>,
    pub remote_addr: SocketAddr,
    pub local_addr: SocketAddr,
    /// Present when the request arrived over TLS.
    pub tls: Option<TlsInfo>,
    /// The error being handled, when executing error routes.
    pub error: Option<HandlerError>,
    /// Static placeholder entries: regexp captures, error facts.
    pub repl: Replacer,
    vars: HashMap<String, String>,
}

impl RequestCtx {
    pub fn new(
        req: http::Request<Body>,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
        tls: Option<TlsInfo>,
    ) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            parts,
            body: Some(body),
            remote_addr,
            local_addr,
            tls,
            error: None,
            repl: Replacer::new(),
            vars: HashMap::new(),
        }
    }

    /// Set a cross-handler variable (`{http.vars.<name>}`).
    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// `http` or `https`, inferred from TLS presence.
    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() {
            "https"
        } else {
            "http"
        }
    }

    /// The request authority as sent: `Host` header, or the URI authority
    /// for HTTP/2-style requests.
    pub fn host_port(&self) -> String {
        if let Some(host) = self
            .parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
        {
            return host.to_string();
        }
        self.parts
            .uri
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_default()
    }

    /// Hostname with any port stripped; brackets removed from IPv6.
    pub fn hostname(&self) -> String {
        let hostport = self.host_port();
        split_host_port(&hostport).0.to_string()
    }

    /// Port portion of the authority, if present.
    pub fn port(&self) -> Option<String> {
        let hostport = self.host_port();
        split_host_port(&hostport).1.map(str::to_string)
    }

    /// Attach a handler error for error-route execution, exposing the
    /// `http.error.*` placeholders.
    pub fn attach_error(&mut self, err: HandlerError) {
        self.repl.set("http.error", err.message.clone());
        self.repl
            .set("http.error.status_code", err.status_or_default().to_string());
        self.repl.set("http.error.message", err.message.clone());
        self.repl.set("http.error.id", err.id.clone());
        self.repl.set("http.error.trace", err.trace.clone());
        self.error = Some(err);
    }

    /// Expand placeholders against this request; unknown keys become
    /// `empty`.
    pub fn replace_all(&self, input: &str, empty: &str) -> String {
        self.repl
            .replace_with(input, empty, |key| self.http_var(key))
    }

    /// Expand placeholders with access to the current response headers
    /// (`{http.response.header.*}`).
    pub fn replace_with_response(
        &self,
        input: &str,
        empty: &str,
        response_headers: &http::HeaderMap,
    ) -> String {
        self.repl.replace_with(input, empty, |key| {
            if let Some(field) = key.strip_prefix("http.response.header.") {
                return response_headers
                    .get(field)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
            }
            self.http_var(key)
        })
    }

    /// Resolve one key of the `http.request.*` / `http.vars.*` namespace.
    pub fn http_var(&self, key: &str) -> Option<String> {
        if let Some(name) = key.strip_prefix("http.vars.") {
            return self.vars.get(name).cloned();
        }
        let rest = key.strip_prefix("http.request.")?;
        let uri = &self.parts.uri;
        match rest {
            "scheme" => Some(self.scheme().to_string()),
            "method" => Some(self.parts.method.to_string()),
            "host" => Some(self.hostname()),
            "hostport" => Some(self.host_port()),
            "port" => self.port(),
            "remote" => Some(self.remote_addr.to_string()),
            "remote.host" => Some(self.remote_addr.ip().to_string()),
            "remote.port" => Some(self.remote_addr.port().to_string()),
            "local" => Some(self.local_addr.to_string()),
            "local.host" => Some(self.local_addr.ip().to_string()),
            "local.port" => Some(self.local_addr.port().to_string()),
            "uri" => Some(
                uri.path_and_query()
                    .map(|pq| pq.to_string())
                    .unwrap_or_else(|| uri.path().to_string()),
            ),
            "uri.path" => Some(uri.path().to_string()),
            "uri.path.dir" => {
                let path = uri.path();
                let end = path.rfind('/').map(|i| i + 1).unwrap_or(0);
                Some(path[..end].to_string())
            }
            "uri.path.file" => {
                let path = uri.path();
                let start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
                Some(path[start..].to_string())
            }
            "uri.path.file.base" => {
                let file = self.http_var("http.request.uri.path.file")?;
                Some(match file.rfind('.') {
                    Some(0) | None => file,
                    Some(dot) => file[..dot].to_string(),
                })
            }
            "uri.path.file.ext" => {
                let file = self.http_var("http.request.uri.path.file")?;
                Some(match file.rfind('.') {
                    Some(0) | None => String::new(),
                    Some(dot) => file[dot..].to_string(),
                })
            }
            "uri.query" => Some(uri.query().unwrap_or_default().to_string()),
            other => {
                if let Some(name) = other.strip_prefix("uri.query.") {
                    return query_param(uri.query().unwrap_or_default(), name);
                }
                if let Some(field) = other.strip_prefix("header.") {
                    return self
                        .parts
                        .headers
                        .get(field)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                }
                if let Some(name) = other.strip_prefix("cookie.") {
                    return cookie_value(&self.parts.headers, name);
                }
                if let Some(idx) = other.strip_prefix("host.labels.") {
                    let idx: usize = idx.parse().ok()?;
                    let host = self.hostname();
                    let labels: Vec<&str> = host.split('.').collect();
                    // labels index from the right: 0 is the TLD
                    return labels
                        .len()
                        .checked_sub(idx + 1)
                        .and_then(|i| labels.get(i))
                        .map(|s| s.to_string());
                }
                if let Some(idx) = other.strip_prefix("uri.path.") {
                    let idx: usize = idx.parse().ok()?;
                    let parts: Vec<&str> = uri.path().split('/').collect();
                    return parts.get(idx).map(|s| s.to_string());
                }
                if let Some(field) = other.strip_prefix("tls.") {
                    return self.tls_var(field);
                }
                None
            }
        }
    }

    fn tls_var(&self, field: &str) -> Option<String> {
        let tls = self.tls.as_ref()?;
        match field {
            "version" => Some(tls.version.clone()),
            "cipher_suite" => Some(tls.cipher_suite.clone()),
            "resumed" => Some(tls.resumed.to_string()),
            "proto" => Some(tls.proto.clone()),
            "server_name" => Some(tls.server_name.clone()),
            "client.subject" => tls.client_subject.clone(),
            "client.issuer" => tls.client_issuer.clone(),
            "client.serial_number" => tls.client_serial.clone(),
            _ => None,
        }
    }
}

fn split_host_port(hostport: &str) -> (&str, Option<&str>) {
    if let Some(end) = hostport.rfind(']') {
        // bracketed IPv6 literal
        let host = hostport[..=end].trim_matches(['[', ']']);
        let port = hostport[end + 1..].strip_prefix(':');
        return (host, port);
    }
    match hostport.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (hostport, None),
    }
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == name).then(|| v.to_string())
    })
}

fn cookie_value(headers: &http::HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}


#[cfg(test)]
mod tests {
    use super::testutil::ctx;
    use super::*;

    #[test]
    fn request_placeholders() {
        let c = ctx("GET", "/foo/bar/index.php?x=1&y=two", "www.example.com:8443");
        let get = |k: &str| c.http_var(k);

        assert_eq!(get("http.request.scheme").as_deref(), Some("http"));
        assert_eq!(get("http.request.method").as_deref(), Some("GET"));
        assert_eq!(get("http.request.host").as_deref(), Some("www.example.com"));
        assert_eq!(
            get("http.request.hostport").as_deref(),
            Some("www.example.com:8443")
        );
        assert_eq!(get("http.request.port").as_deref(), Some("8443"));
        assert_eq!(
            get("http.request.uri").as_deref(),
            Some("/foo/bar/index.php?x=1&y=two")
        );
        assert_eq!(
            get("http.request.uri.path").as_deref(),
            Some("/foo/bar/index.php")
        );
        assert_eq!(get("http.request.uri.path.dir").as_deref(), Some("/foo/bar/"));
        assert_eq!(
            get("http.request.uri.path.file").as_deref(),
            Some("index.php")
        );
        assert_eq!(
            get("http.request.uri.path.file.base").as_deref(),
            Some("index")
        );
        assert_eq!(get("http.request.uri.path.file.ext").as_deref(), Some(".php"));
        assert_eq!(get("http.request.uri.query").as_deref(), Some("x=1&y=two"));
        assert_eq!(get("http.request.uri.query.y").as_deref(), Some("two"));
        assert_eq!(get("http.request.uri.query.z"), None);
        assert_eq!(get("http.request.remote.host").as_deref(), Some("203.0.113.9"));
        assert_eq!(get("http.request.remote.port").as_deref(), Some("55000"));
        assert_eq!(get("http.request.local.port").as_deref(), Some("443"));
    }

    #[test]
    fn host_labels_index_from_the_right() {
        let c = ctx("GET", "/", "api.staging.example.com");
        assert_eq!(
            c.http_var("http.request.host.labels.0").as_deref(),
            Some("com")
        );
        assert_eq!(
            c.http_var("http.request.host.labels.1").as_deref(),
            Some("example")
        );
        assert_eq!(
            c.http_var("http.request.host.labels.3").as_deref(),
            Some("api")
        );
        assert_eq!(c.http_var("http.request.host.labels.4"), None);
    }

    #[test]
    fn path_segments_index_past_the_leading_slash() {
        let c = ctx("GET", "/a/b/c", "example.com");
        assert_eq!(c.http_var("http.request.uri.path.1").as_deref(), Some("a"));
        assert_eq!(c.http_var("http.request.uri.path.3").as_deref(), Some("c"));
        assert_eq!(c.http_var("http.request.uri.path.4"), None);
    }

    #[test]
    fn cookies_and_headers() {
        let mut c = ctx("GET", "/", "example.com");
        c.parts
            .headers
            .insert(header::COOKIE, "sid=abc123; theme=dark".parse().unwrap());
        c.parts
            .headers
            .insert("X-Custom", "42".parse().unwrap());
        assert_eq!(
            c.http_var("http.request.cookie.theme").as_deref(),
            Some("dark")
        );
        assert_eq!(
            c.http_var("http.request.header.X-Custom").as_deref(),
            Some("42")
        );
    }

    #[test]
    fn vars_round_trip_through_placeholders() {
        let mut c = ctx("GET", "/", "example.com");
        c.set_var("upstream", "backend-1");
        assert_eq!(c.get_var("upstream"), Some("backend-1"));
        assert_eq!(c.replace_all("to {http.vars.upstream}", ""), "to backend-1");
    }

    #[test]
    fn error_placeholders_after_attach() {
        let mut c = ctx("GET", "/", "example.com");
        c.attach_error(HandlerError::new(502, "upstream unreachable"));
        assert_eq!(
            c.replace_all("{http.error.status_code}", ""),
            "502"
        );
        assert_eq!(
            c.replace_all("{http.error.message}", ""),
            "upstream unreachable"
        );
        assert!(!c.replace_all("{http.error.id}", "").is_empty());
    }

    #[test]
    fn ipv6_authority_splits() {
        let c = ctx("GET", "/", "[2001:db8::1]:8080");
        assert_eq!(c.http_var("http.request.host").as_deref(), Some("2001:db8::1"));
        assert_eq!(c.http_var("http.request.port").as_deref(), Some("8080"));
    }
}
