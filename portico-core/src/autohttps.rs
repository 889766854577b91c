//! Automatic HTTPS planning.
//!
//! Phase 1 runs during provisioning, after route matchers are decoded but
//! before handlers are: it walks every server's host matchers, decides
//! which names get managed certificates, enables TLS on the servers that
//! need it, synthesizes HTTP→HTTPS redirect routes (and a dedicated
//! redirect server for addresses no user server owns), and registers
//! automation policies with the TLS subsystem. Phase 2 runs after all
//! listeners are bound and hands the collected names to certificate
//! management, so the challenge solver can never race the app for its own
//! ports.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;

use portico_tls::{ConnectionPolicy, IssuerConfig, TlsApp};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app::App;
use crate::error::Result;
use crate::listeners::NetworkAddress;
use crate::matchers::MatchHost;
use crate::routes::{Route, RouteList};
use crate::server::Server;

/// Name of the synthesized server that carries redirects whose listener
/// addresses no user server occupies.
pub const REDIR_SERVER_NAME: &str = "remaining_auto_https_redirects";

/// Group label on every synthesized redirect route. Doubles as the marker
/// that lets a replan strip previous synthesis, and guarantees at most one
/// generated redirect applies to a request.
pub const REDIR_GROUP: &str = "auto_https_redirects";

fn is_false(b: &bool) -> bool {
    !b
}

/// Per-server automatic-HTTPS settings.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoHttpsConfig {
    /// Turn the feature off entirely for this server.
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable: bool,

    /// Keep certificate management but do not generate redirects.
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_redirects: bool,

    /// Keep redirects but do not manage certificates.
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_certificates: bool,

    /// Names excluded from both certificates and redirects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip: Vec<String>,

    /// Names excluded from certificate management only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_certificates: Vec<String>,

    /// Manage certificates even for names already covered by loaded
    /// certificates.
    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore_loaded_certificates: bool,
}

/// Whether a host-matcher pattern can be a certificate subject at all.
fn qualifies(pattern: &str) -> bool {
    !pattern.is_empty()
        && !pattern.contains('{')
        && !pattern.contains('/')
        && !pattern.contains(' ')
}

/// Names that can never pass public CA validation get the internal issuer.
fn is_internal(name: &str) -> bool {
    name == "localhost"
        || name.ends_with(".localhost")
        || name.ends_with(".local")
        || !name.contains('.')
        || name.parse::<IpAddr>().is_ok()
}

/// Phase 1. Iteration over the servers map is name-sorted so the plan is
/// independent of map order; previously synthesized routes, servers, and
/// policies are stripped first so replanning an unchanged config converges
/// to the identical state.
pub(crate) fn plan(app: &mut App, tls: &Arc<TlsApp>) -> Result<()> {
    app.servers.remove(REDIR_SERVER_NAME);
    for srv in app.servers.values_mut() {
        srv.routes.retain(|r| r.group != REDIR_GROUP);
    }
    tls.automation_mut().policies.retain(|p| !p.synthesized);

    let http_port = app.http_port();
    let https_port = app.https_port();

    // domain → preferred redirect-source address
    let mut redir_domains: BTreeMap<String, NetworkAddress> = BTreeMap::new();
    let mut unique_domains: BTreeSet<String> = BTreeSet::new();

    let names: Vec<String> = app.servers.keys().cloned().collect();

    for name in &names {
        let srv = app.servers.get_mut(name).expect("server exists");
        if srv.automatic_https.disable {
            continue;
        }

        let addrs = srv.listen_addrs()?;
        let ports: BTreeSet<u16> = addrs
            .iter()
            .filter(|a| !a.is_unix())
            .flat_map(|a| a.port_range())
            .collect();

        if !ports.is_empty() && ports.iter().all(|p| *p == http_port) {
            tracing::info!(
                server = %name,
                "server is only listening on the HTTP port, so no automatic HTTPS will be applied to this server"
            );
            srv.automatic_https.disable = true;
            continue;
        }

        if srv.tls_connection_policies.is_empty()
            && !ports.is_empty()
            && ports.iter().all(|p| *p == https_port)
        {
            srv.tls_connection_policies.push(ConnectionPolicy::default());
        }

        // hostnames this server serves, per its host matchers
        let mut server_domains: BTreeSet<String> = BTreeSet::new();
        for route in srv.routes.iter() {
            for set in route.matcher_sets() {
                for host in set
                    .matchers
                    .iter()
                    .filter_map(|m| m.as_any().downcast_ref::<MatchHost>())
                {
                    for pattern in host.patterns() {
                        if !qualifies(pattern) {
                            continue;
                        }
                        if srv.automatic_https.skip.iter().any(|s| s == pattern) {
                            tracing::info!(server = %name, domain = %pattern, "skipping automatic HTTPS for domain");
                            continue;
                        }
                        server_domains.insert(pattern.clone());
                    }
                }
            }
        }

        if server_domains.is_empty() && srv.tls_connection_policies.is_empty() {
            continue;
        }

        if !srv.automatic_https.disable_certificates {
            for domain in &server_domains {
                if srv
                    .automatic_https
                    .skip_certificates
                    .iter()
                    .any(|s| s == domain)
                {
                    continue;
                }
                if !srv.automatic_https.ignore_loaded_certificates
                    && tls.has_certificate_for_subject(domain)
                {
                    tracing::info!(
                        domain = %domain,
                        "skipping automatic certificate management because one or more matching certificates are already loaded"
                    );
                    continue;
                }
                unique_domains.insert(domain.clone());
            }
        }

        if srv.tls_connection_policies.is_empty() {
            srv.tls_connection_policies.push(ConnectionPolicy::default());
        }

        if srv.automatic_https.disable_redirects {
            continue;
        }

        // record the redirect source for each domain; among multiple
        // TLS-enabled addresses, the one on the HTTPS port is preferred
        for addr in &addrs {
            if addr.is_unix() {
                continue;
            }
            for domain in &server_domains {
                match redir_domains.entry(domain.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(addr.with_port(addr.start_port));
                    }
                    Entry::Occupied(mut slot) => {
                        if slot.get().start_port != https_port && addr.start_port == https_port {
                            slot.insert(addr.with_port(addr.start_port));
                        }
                    }
                }
            }
        }
    }

    app.all_cert_domains = unique_domains.iter().cloned().collect();

    let internal: Vec<String> = {
        let automation = tls.automation();
        unique_domains
            .iter()
            .filter(|d| is_internal(d) && !automation.has_explicit_policy_for(d))
            .cloned()
            .collect()
    };
    create_automation_policies(app, tls, internal)?;

    // group redirect domains by source address
    let mut domains_by_addr: BTreeMap<String, (NetworkAddress, Vec<String>)> = BTreeMap::new();
    for (domain, addr) in redir_domains {
        domains_by_addr
            .entry(addr.to_string())
            .or_insert_with(|| (addr, Vec::new()))
            .1
            .push(domain);
    }

    let mut redir_server_routes: Vec<Route> = Vec::new();
    let mut redir_server_addrs: BTreeSet<String> = BTreeSet::new();
    let mut merged_servers: BTreeSet<String> = BTreeSet::new();

    for (_, (addr, domains)) in domains_by_addr {
        let route = redirect_route(&addr, &domains, http_port, https_port);
        let redir_listen = addr.with_port(http_port);
        let redir_key = redir_listen.key_at(http_port);

        // ties between servers owning the same address resolve to the
        // first in name order
        let owner = names
            .iter()
            .find(|n| {
                app.servers.get(*n).is_some_and(|srv| {
                    srv.listen.iter().any(|l| {
                        NetworkAddress::parse(l).is_ok_and(|a| {
                            !a.is_unix() && a.port_range().any(|p| a.key_at(p) == redir_key)
                        })
                    })
                })
            })
            .cloned();

        match owner {
            Some(owner_name) => {
                if unique_domains.is_empty() {
                    tracing::debug!(
                        server = %owner_name,
                        address = %redir_listen,
                        "no hostnames qualify for certificates; not inserting redirect routes"
                    );
                } else {
                    let srv = app.servers.get_mut(&owner_name).expect("owner exists");
                    if srv
                        .routes
                        .iter()
                        .any(|r| r.group != REDIR_GROUP && r.matcher_sets.is_empty())
                    {
                        tracing::warn!(
                            server = %owner_name,
                            address = %redir_listen,
                            "server already has a catch-all route on this address; its routes take precedence over the generated redirects"
                        );
                    }
                    let idx = host_matcher_insertion_index(&srv.routes);
                    srv.routes.insert(idx, route);
                    merged_servers.insert(owner_name);
                }
            }
            None => {
                redir_server_routes.push(route);
                redir_server_addrs.insert(redir_listen.listen_string());
            }
        }
    }

    // the catch-all redirect keeps on-demand TLS hosts (unknown at config
    // time) redirecting too; it goes last in every server that carries
    // generated redirects
    for name in merged_servers {
        let srv = app.servers.get_mut(&name).expect("server exists");
        srv.routes.push(catch_all_redirect_route(https_port));
    }

    if !redir_server_routes.is_empty() {
        redir_server_routes.push(catch_all_redirect_route(https_port));
        let server = Server {
            listen: redir_server_addrs.into_iter().collect(),
            routes: RouteList(redir_server_routes),
            name: REDIR_SERVER_NAME.to_string(),
            ..Default::default()
        };
        tracing::info!(
            server = REDIR_SERVER_NAME,
            listen = ?server.listen,
            "🔄 enabling automatic HTTP->HTTPS redirects"
        );
        app.servers.insert(REDIR_SERVER_NAME.to_string(), server);
    }

    Ok(())
}

/// Ensure the TLS subsystem has a base policy compatible with the app's
/// ports, and a separate internal-issuer policy when internal subjects
/// exist.
pub(crate) fn create_automation_policies(
    app: &App,
    tls: &TlsApp,
    internal: Vec<String>,
) -> Result<()> {
    let mut automation = tls.automation_mut();

    // adopt an existing catch-all as the base, else synthesize one
    if !automation.policies.iter().any(|p| p.is_catch_all()) {
        let mut base = portico_tls::AutomationPolicy::base_acme();
        base.synthesized = true;
        automation.policies.push(base);
    }

    // fill in unset challenge ports on every ACME issuer and re-render
    for policy in &mut automation.policies {
        for issuer in &mut policy.issuers {
            if let IssuerConfig::Acme(acme) = issuer {
                if acme.alternate_http_port.is_none() {
                    acme.alternate_http_port = Some(app.http_port());
                }
                if acme.alternate_tlsalpn_port.is_none() {
                    acme.alternate_tlsalpn_port = Some(app.https_port());
                }
                acme.check()?;
            }
        }
    }

    if !internal.is_empty() {
        let base = automation
            .policies
            .iter()
            .position(|p| p.is_catch_all())
            .expect("catch-all policy exists");
        let mut policy = automation.policies[base].clone();
        policy.subjects = internal;
        policy.issuers = vec![IssuerConfig::Internal(portico_tls::InternalIssuer::default())];
        policy.synthesized = true;
        automation.policies.push(policy);
    }

    automation.validate()?;
    Ok(())
}

/// Phase 2: after listeners are bound, hand the collected names to the
/// TLS subsystem and clear the transient set.
pub(crate) async fn finalize(app: &mut App, tls: &Arc<TlsApp>) -> Result<()> {
    if app.all_cert_domains.is_empty() {
        return Ok(());
    }
    let names = std::mem::take(&mut app.all_cert_domains);
    tracing::info!(count = names.len(), "🔐 beginning certificate management");
    tls.manage(names).await?;
    Ok(())
}

/// Index right after the last route that carries a host matcher.
fn host_matcher_insertion_index(routes: &RouteList) -> usize {
    let mut idx = 0;
    for (i, route) in routes.iter().enumerate() {
        let has_host = route
            .matcher_sets()
            .iter()
            .any(|set| set.get::<MatchHost>().is_some());
        if has_host {
            idx = i + 1;
        }
    }
    idx
}

fn redirect_handler(location: String) -> serde_json::Value {
    json!({
        "handler": "static_response",
        "status_code": 308,
        "headers": {
            "Location": [location],
            "Connection": ["close"],
        },
        "close": true,
    })
}

/// A redirect route for `domains` discovered on TLS address `addr`. The
/// port is spelled out only when it is not implied: the standard 443, the
/// configured HTTPS port, or the HTTP port (a redirect back into the HTTP
/// port would loop).
fn redirect_route(
    addr: &NetworkAddress,
    domains: &[String],
    http_port: u16,
    https_port: u16,
) -> Route {
    let mut matcher = serde_json::Map::new();
    matcher.insert("protocol".to_string(), json!("http"));
    if !(domains.len() == 1 && domains[0].is_empty()) {
        let mut sorted = domains.to_vec();
        sorted.sort();
        matcher.insert("host".to_string(), json!(sorted));
    }

    let port_suffix = if addr.start_port == 443
        || addr.start_port == https_port
        || addr.start_port == http_port
    {
        String::new()
    } else {
        format!(":{}", addr.start_port)
    };
    let location = format!("https://{{http.request.host}}{port_suffix}{{http.request.uri}}");

    Route {
        matcher_sets: vec![matcher],
        handle: vec![redirect_handler(location)],
        group: REDIR_GROUP.to_string(),
        ..Default::default()
    }
}

/// The final `{protocol=http}`-only redirect route.
fn catch_all_redirect_route(https_port: u16) -> Route {
    let mut matcher = serde_json::Map::new();
    matcher.insert("protocol".to_string(), json!("http"));

    let port_suffix = if https_port == 443 {
        String::new()
    } else {
        format!(":{https_port}")
    };
    let location = format!("https://{{http.request.host}}{port_suffix}{{http.request.uri}}");

    Route {
        matcher_sets: vec![matcher],
        handle: vec![redirect_handler(location)],
        group: REDIR_GROUP.to_string(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Registry;
    use portico_tls::TlsConfig;

    fn provisioned_app(json: &str, tls: &Arc<TlsApp>) -> App {
        let mut app: App = serde_json::from_str(json).unwrap();
        app.provision(Registry::global(), tls).unwrap();
        app
    }

    fn tls_app() -> Arc<TlsApp> {
        TlsApp::new(TlsConfig::default()).unwrap()
    }

    fn tls_app_from(json: &str) -> Arc<TlsApp> {
        TlsApp::new(serde_json::from_str(json).unwrap()).unwrap()
    }

    fn host_patterns(route: &Route) -> Vec<String> {
        route
            .matcher_sets()
            .iter()
            .filter_map(|set| set.get::<MatchHost>())
            .flat_map(|h| h.patterns().to_vec())
            .collect()
    }

    #[test]
    fn single_https_server_gets_policy_and_redirect_server() {
        let tls = tls_app();
        let app = provisioned_app(
            r#"{
                "servers": {
                    "srv0": {
                        "listen": [":443"],
                        "routes": [
                            {"match": [{"host": ["example.com"]}],
                             "handle": [{"handler": "static_response", "status_code": 200}]}
                        ]
                    }
                }
            }"#,
            &tls,
        );

        assert_eq!(app.all_cert_domains, vec!["example.com".to_string()]);

        let srv0 = &app.servers["srv0"];
        assert_eq!(srv0.tls_connection_policies.len(), 1);

        let redir = &app.servers[REDIR_SERVER_NAME];
        assert_eq!(redir.listen, vec![":80".to_string()]);
        assert_eq!(redir.routes.len(), 2);

        // first route: protocol=http AND host=[example.com]
        let first = &redir.routes.0[0];
        assert_eq!(host_patterns(first), vec!["example.com".to_string()]);
        let handler = &first.handle[0];
        assert_eq!(handler["status_code"], 308);
        assert_eq!(
            handler["headers"]["Location"][0],
            "https://{http.request.host}{http.request.uri}"
        );

        // last route: catch-all, protocol only
        let last = &redir.routes.0[1];
        assert!(host_patterns(last).is_empty());
        assert_eq!(last.matcher_sets.len(), 1);
        assert!(last.matcher_sets[0].contains_key("protocol"));
        assert!(!last.matcher_sets[0].contains_key("host"));

        // a base automation policy exists with the app's ports filled in
        let automation = tls.automation();
        let base = automation.policies.iter().find(|p| p.is_catch_all()).unwrap();
        match &base.issuers[0] {
            IssuerConfig::Acme(acme) => {
                assert_eq!(acme.alternate_http_port, Some(80));
                assert_eq!(acme.alternate_tlsalpn_port, Some(443));
            }
            other => panic!("expected ACME issuer, got {other:?}"),
        }
    }

    #[test]
    fn http_only_server_is_left_alone() {
        let tls = tls_app();
        let app = provisioned_app(
            r#"{
                "servers": {
                    "plain": {
                        "listen": [":80"],
                        "routes": [
                            {"handle": [{"handler": "static_response", "status_code": 200}]}
                        ]
                    }
                }
            }"#,
            &tls,
        );

        assert!(app.all_cert_domains.is_empty());
        assert!(!app.servers.contains_key(REDIR_SERVER_NAME));
        let plain = &app.servers["plain"];
        assert!(plain.automatic_https.disable);
        assert!(plain.tls_connection_policies.is_empty());
        assert_eq!(plain.routes.len(), 1);
    }

    #[test]
    fn skip_list_excludes_certs_and_redirects() {
        let tls = tls_app();
        let app = provisioned_app(
            r#"{
                "servers": {
                    "srv0": {
                        "listen": [":443"],
                        "automatic_https": {"skip": ["internal.example.com"]},
                        "routes": [
                            {"match": [{"host": ["public.example.com", "internal.example.com"]}],
                             "handle": [{"handler": "static_response", "status_code": 200}]}
                        ]
                    }
                }
            }"#,
            &tls,
        );

        assert_eq!(app.all_cert_domains, vec!["public.example.com".to_string()]);

        let redir = &app.servers[REDIR_SERVER_NAME];
        assert_eq!(
            host_patterns(&redir.routes.0[0]),
            vec!["public.example.com".to_string()]
        );
    }

    #[test]
    fn skip_certificates_keeps_redirects() {
        let tls = tls_app();
        let app = provisioned_app(
            r#"{
                "servers": {
                    "srv0": {
                        "listen": [":443"],
                        "automatic_https": {"skip_certificates": ["example.com"]},
                        "routes": [
                            {"match": [{"host": ["example.com"]}],
                             "handle": [{"handler": "static_response", "status_code": 200}]}
                        ]
                    }
                }
            }"#,
            &tls,
        );

        assert!(app.all_cert_domains.is_empty());
        let redir = &app.servers[REDIR_SERVER_NAME];
        assert_eq!(
            host_patterns(&redir.routes.0[0]),
            vec!["example.com".to_string()]
        );
    }

    #[test]
    fn loaded_certificates_suppress_management() {
        let tls = tls_app();
        {
            let cert = portico_tls::InternalIssuer::default()
                .issue(&["already.example.com".to_string()])
                .unwrap();
            tls.cache().insert(cert);
        }
        let app = provisioned_app(
            r#"{
                "servers": {
                    "srv0": {
                        "listen": [":443"],
                        "routes": [
                            {"match": [{"host": ["already.example.com", "new.example.com"]}],
                             "handle": [{"handler": "static_response", "status_code": 200}]}
                        ]
                    }
                }
            }"#,
            &tls,
        );
        assert_eq!(app.all_cert_domains, vec!["new.example.com".to_string()]);
    }

    #[test]
    fn redirects_merge_into_owning_server_after_host_routes() {
        let tls = tls_app();
        let app = provisioned_app(
            r#"{
                "servers": {
                    "http": {
                        "listen": [":80"],
                        "routes": [
                            {"match": [{"host": ["plain.example.com"]}],
                             "handle": [{"handler": "static_response", "status_code": 200}]},
                            {"handle": [{"handler": "static_response", "status_code": 404}]}
                        ]
                    },
                    "https": {
                        "listen": [":443"],
                        "routes": [
                            {"match": [{"host": ["secure.example.com"]}],
                             "handle": [{"handler": "static_response", "status_code": 200}]}
                        ]
                    }
                }
            }"#,
            &tls,
        );

        assert!(!app.servers.contains_key(REDIR_SERVER_NAME));
        let http = &app.servers["http"];
        assert_eq!(http.routes.len(), 4);

        // 0: user host route, 1: injected redirect, 2: user catch-all,
        // 3: injected catch-all redirect
        assert_eq!(
            host_patterns(&http.routes.0[0]),
            vec!["plain.example.com".to_string()]
        );
        assert_eq!(http.routes.0[1].group, REDIR_GROUP);
        assert_eq!(
            host_patterns(&http.routes.0[1]),
            vec!["secure.example.com".to_string()]
        );
        assert!(http.routes.0[2].group.is_empty());
        assert!(http.routes.0[2].matcher_sets.is_empty());
        assert_eq!(http.routes.0[3].group, REDIR_GROUP);
        assert!(host_patterns(&http.routes.0[3]).is_empty());
    }

    #[test]
    fn phase1_is_idempotent() {
        let tls = tls_app();
        let mut app = provisioned_app(
            r#"{
                "servers": {
                    "srv0": {
                        "listen": [":443", ":8443"],
                        "routes": [
                            {"match": [{"host": ["a.example.com", "b.example.com"]}],
                             "handle": [{"handler": "static_response", "status_code": 200}]}
                        ]
                    },
                    "http": {
                        "listen": [":80"],
                        "routes": [
                            {"handle": [{"handler": "static_response", "status_code": 404}]}
                        ]
                    }
                }
            }"#,
            &tls,
        );

        let servers_before = serde_json::to_value(&app.servers).unwrap();
        let policies_before = serde_json::to_value(&tls.automation().policies).unwrap();
        let certs_before = app.all_cert_domains.clone();

        // replan the already-planned app
        app.provision(Registry::global(), &tls).unwrap();

        assert_eq!(serde_json::to_value(&app.servers).unwrap(), servers_before);
        assert_eq!(
            serde_json::to_value(&tls.automation().policies).unwrap(),
            policies_before
        );
        assert_eq!(app.all_cert_domains, certs_before);
    }

    #[test]
    fn internal_names_get_an_internal_policy() {
        let tls = tls_app();
        let app = provisioned_app(
            r#"{
                "servers": {
                    "srv0": {
                        "listen": [":443"],
                        "routes": [
                            {"match": [{"host": ["localhost", "public.example.com"]}],
                             "handle": [{"handler": "static_response", "status_code": 200}]}
                        ]
                    }
                }
            }"#,
            &tls,
        );

        assert_eq!(
            app.all_cert_domains,
            vec!["localhost".to_string(), "public.example.com".to_string()]
        );
        let automation = tls.automation();
        let internal = automation
            .policies
            .iter()
            .find(|p| p.subjects == vec!["localhost".to_string()])
            .expect("internal policy exists");
        assert!(matches!(internal.issuers[0], IssuerConfig::Internal(_)));
    }

    #[test]
    fn explicit_user_policy_overrides_internal_partition() {
        let tls = tls_app_from(
            r#"{
                "automation": {
                    "policies": [
                        {"subjects": ["localhost"], "issuers": [{"module": "acme", "ca": "https://ca.internal/dir"}]}
                    ]
                }
            }"#,
        );
        let _app = provisioned_app(
            r#"{
                "servers": {
                    "srv0": {
                        "listen": [":443"],
                        "routes": [
                            {"match": [{"host": ["localhost"]}],
                             "handle": [{"handler": "static_response", "status_code": 200}]}
                        ]
                    }
                }
            }"#,
            &tls,
        );

        // no synthesized internal policy; the user's explicit one stands
        let automation = tls.automation();
        let for_localhost: Vec<_> = automation
            .policies
            .iter()
            .filter(|p| p.subjects.contains(&"localhost".to_string()))
            .collect();
        assert_eq!(for_localhost.len(), 1);
        assert!(matches!(for_localhost[0].issuers[0], IssuerConfig::Acme(_)));
    }

    #[test]
    fn nonstandard_https_port_appears_in_location() {
        let tls = tls_app();
        let app = provisioned_app(
            r#"{
                "https_port": 8443,
                "servers": {
                    "srv0": {
                        "listen": [":9443"],
                        "routes": [
                            {"match": [{"host": ["example.com"]}],
                             "handle": [{"handler": "static_response", "status_code": 200}]}
                        ]
                    }
                }
            }"#,
            &tls,
        );

        let redir = &app.servers[REDIR_SERVER_NAME];
        let handler = &redir.routes.0[0].handle[0];
        assert_eq!(
            handler["headers"]["Location"][0],
            "https://{http.request.host}:9443{http.request.uri}"
        );
        // the catch-all targets the configured HTTPS port
        let last = redir.routes.0.last().unwrap();
        assert_eq!(
            last.handle[0]["headers"]["Location"][0],
            "https://{http.request.host}:8443{http.request.uri}"
        );
    }

    #[test]
    fn disable_redirects_still_manages_certificates() {
        let tls = tls_app();
        let app = provisioned_app(
            r#"{
                "servers": {
                    "srv0": {
                        "listen": [":443"],
                        "automatic_https": {"disable_redirects": true},
                        "routes": [
                            {"match": [{"host": ["example.com"]}],
                             "handle": [{"handler": "static_response", "status_code": 200}]}
                        ]
                    }
                }
            }"#,
            &tls,
        );

        assert_eq!(app.all_cert_domains, vec!["example.com".to_string()]);
        assert!(!app.servers.contains_key(REDIR_SERVER_NAME));
    }

    #[test]
    fn disabled_auto_https_is_untouched() {
        let tls = tls_app();
        let app = provisioned_app(
            r#"{
                "servers": {
                    "srv0": {
                        "listen": [":443"],
                        "automatic_https": {"disable": true},
                        "routes": [
                            {"match": [{"host": ["example.com"]}],
                             "handle": [{"handler": "static_response", "status_code": 200}]}
                        ]
                    }
                }
            }"#,
            &tls,
        );

        assert!(app.all_cert_domains.is_empty());
        assert!(app.servers["srv0"].tls_connection_policies.is_empty());
        assert!(!app.servers.contains_key(REDIR_SERVER_NAME));
    }
}
