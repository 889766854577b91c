//! The HTTP app: owns all servers and their lifecycle.
//!
//! Provisioning order matters: route matchers are decoded first so the
//! auto-HTTPS planner can read host matchers, then the planner runs (it
//! may add routes, servers, and connection policies), then handlers are
//! decoded and the whole config validated. `start` binds every listener
//! before phase 2 triggers certificate management; `stop` shuts down
//! gracefully within the configured grace period.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use portico_tls::TlsApp;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::autohttps;
use crate::error::{Error, Result};
use crate::listeners;
use crate::module::Registry;
use crate::server::{self, Server};
use crate::util::duration_opt;

/// Tracker for per-connection tasks, shared by all accept loops.
pub(crate) type ConnTracker = Arc<tokio::sync::Mutex<JoinSet<()>>>;

pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_HTTPS_PORT: u16 = 443;

#[derive(Default, Serialize, Deserialize)]
pub struct App {
    /// Port plaintext HTTP traffic uses (redirect sources, HTTP-01).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,

    /// Port HTTPS traffic uses (redirect targets, TLS-ALPN).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_port: Option<u16>,

    /// How long `stop` waits for in-flight requests. Unset waits
    /// indefinitely.
    #[serde(default, with = "duration_opt", skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<Duration>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub servers: BTreeMap<String, Server>,

    /// Names phase 2 must hand to certificate management. Populated by
    /// phase 1, cleared by phase 2.
    #[serde(skip)]
    pub(crate) all_cert_domains: Vec<String>,

    #[serde(skip)]
    run: Option<RunState>,
}

struct RunState {
    shutdown: watch::Sender<bool>,
    accept_tasks: JoinSet<()>,
    conns: ConnTracker,
    h3_endpoints: Vec<quinn::Endpoint>,
    local_addrs: Vec<SocketAddr>,
}

impl App {
    pub fn http_port(&self) -> u16 {
        self.http_port.unwrap_or(DEFAULT_HTTP_PORT)
    }

    pub fn https_port(&self) -> u16 {
        self.https_port.unwrap_or(DEFAULT_HTTPS_PORT)
    }

    /// The hostnames phase 2 will manage certificates for.
    pub fn cert_domains(&self) -> &[String] {
        &self.all_cert_domains
    }

    /// Decode and provision all modules and run auto-HTTPS phase 1.
    pub fn provision(&mut self, registry: &Registry, tls: &Arc<TlsApp>) -> Result<()> {
        for (name, srv) in &mut self.servers {
            srv.name = name.clone();
            srv.provision_matchers(registry)?;
        }

        autohttps::plan(self, tls)?;

        for (name, srv) in &mut self.servers {
            srv.name = name.clone();
            srv.provision_matchers(registry)?;
            srv.provision_handlers(registry)?;
        }

        self.validate()
    }

    /// Reject configs whose servers share a listener address.
    pub fn validate(&self) -> Result<()> {
        let mut owners: BTreeMap<String, &str> = BTreeMap::new();
        for (name, srv) in &self.servers {
            for addr in srv.listen_addrs()? {
                if addr.is_unix() {
                    let key = addr.key_at(0);
                    if let Some(other) = owners.insert(key.clone(), name) {
                        return Err(Error::Validation(format!(
                            "servers {other} and {name} both listen on {key}"
                        )));
                    }
                    continue;
                }
                for port in addr.port_range() {
                    let key = addr.key_at(port);
                    if let Some(other) = owners.insert(key.clone(), name) {
                        return Err(Error::Validation(format!(
                            "servers {other} and {name} both listen on {key}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Bind all listeners, spawn the serving tasks, then run auto-HTTPS
    /// phase 2. On a bind error every listener bound in this cycle is
    /// released before returning.
    pub async fn start(&mut self, tls: Arc<TlsApp>) -> Result<()> {
        if self.run.is_some() {
            return Err(Error::Validation("app is already started".to_string()));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let conns: ConnTracker = Arc::new(tokio::sync::Mutex::new(JoinSet::new()));
        let mut accept_tasks = JoinSet::new();
        let mut h3_endpoints = Vec::new();
        let mut local_addrs = Vec::new();
        let http_port = self.http_port();

        struct Bound {
            server: Arc<Server>,
            listener: Arc<listeners::SharedListener>,
            tls_config: Option<Arc<rustls::ServerConfig>>,
        }
        let mut bound: Vec<Bound> = Vec::new();

        for (name, srv) in &self.servers {
            let srv = Arc::new(srv.clone());
            let tls_config = if srv.tls_connection_policies.is_empty() {
                None
            } else {
                Some(portico_tls::build_server_config(
                    &srv.tls_connection_policies,
                    tls.cache(),
                )?)
            };

            for addr in srv.listen_addrs()? {
                for port in addr.port_range() {
                    // dropping `bound` on error closes everything bound so far
                    let listener = listeners::listen(&addr, port).await?;
                    let wrap = tls_config.clone().filter(|_| port != http_port);
                    if let Ok(local) = listener.local_addr() {
                        local_addrs.push(local);
                    }
                    tracing::info!(
                        server = %name,
                        address = %addr.key_at(port),
                        tls = wrap.is_some(),
                        "listening"
                    );

                    if wrap.is_some() && srv.experimental_http3 {
                        let h3_config = portico_tls::build_h3_server_config(
                            &srv.tls_connection_policies,
                            tls.cache(),
                        )?;
                        let endpoint = crate::http3::bind_endpoint(&addr, port, h3_config)?;
                        accept_tasks.spawn(crate::http3::serve(
                            endpoint.clone(),
                            srv.clone(),
                            tls.clone(),
                            conns.clone(),
                            shutdown_rx.clone(),
                        ));
                        h3_endpoints.push(endpoint);
                    }

                    bound.push(Bound {
                        server: srv.clone(),
                        listener,
                        tls_config: wrap,
                    });
                }
            }
        }

        for b in bound {
            accept_tasks.spawn(server::accept_loop(
                b.server,
                b.listener,
                b.tls_config,
                tls.clone(),
                conns.clone(),
                shutdown_rx.clone(),
            ));
        }

        // all listeners are bound; certificate management may begin
        autohttps::finalize(self, &tls).await?;

        self.run = Some(RunState {
            shutdown: shutdown_tx,
            accept_tasks,
            conns,
            h3_endpoints,
            local_addrs,
        });
        Ok(())
    }

    /// Addresses actually bound (useful with port 0).
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.run
            .as_ref()
            .map(|r| r.local_addrs.clone())
            .unwrap_or_default()
    }

    /// Stop accepting immediately, then wait up to the grace period for
    /// in-flight requests before aborting them.
    pub async fn stop(&mut self) {
        let Some(mut run) = self.run.take() else {
            return;
        };
        let _ = run.shutdown.send(true);

        while run.accept_tasks.join_next().await.is_some() {}

        for endpoint in &run.h3_endpoints {
            endpoint.close(0u32.into(), b"server stopped");
        }

        let mut conns = run.conns.lock().await;
        match self.grace_period {
            Some(grace) => {
                if tokio::time::timeout(grace, drain(&mut conns)).await.is_err() {
                    tracing::warn!(
                        grace = ?grace,
                        "grace period elapsed; aborting remaining connections"
                    );
                    conns.abort_all();
                    drain(&mut conns).await;
                }
            }
            None => drain(&mut conns).await,
        }
        tracing::info!("servers stopped");
    }
}

async fn drain(set: &mut JoinSet<()>) {
    while set.join_next().await.is_some() {}
}
