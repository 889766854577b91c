//! Listen-address grammar and the shared listener registry.
//!
//! Addresses follow `[network/]host:port[-endport]`; a port range expands
//! to one listener per port. Bound sockets are kept in a process-global,
//! reference-counted registry so config reloads (and multiple apps) reuse
//! the same socket instead of racing to rebind it.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// A parsed listen address. `host` is stored without IPv6 brackets; a
/// single port is a range of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAddress {
    pub network: String,
    pub host: String,
    pub start_port: u16,
    pub end_port: u16,
}

impl NetworkAddress {
    /// Parse `[network/]host:port[-endport]`. The network defaults to
    /// `tcp`; unix sockets carry the path in `host` and no ports.
    pub fn parse(addr: &str) -> Result<Self> {
        const NETWORKS: &[&str] = &[
            "tcp", "tcp4", "tcp6", "udp", "udp4", "udp6", "unix", "unixgram", "unixpacket",
        ];
        let (network, rest) = match addr.split_once('/') {
            Some((net, rest)) if NETWORKS.contains(&net) => (net.to_string(), rest.to_string()),
            _ => ("tcp".to_string(), addr.to_string()),
        };

        if network.starts_with("unix") {
            if rest.is_empty() {
                return Err(Error::Provision(format!(
                    "unix listen address {addr:?} has no socket path"
                )));
            }
            // split_once ate the leading path slash
            let path = format!("/{rest}");
            return Ok(Self {
                network,
                host: path,
                start_port: 0,
                end_port: 0,
            });
        }

        let (host, port_part) = split_host_port(&rest).ok_or_else(|| {
            Error::Provision(format!("listen address {addr:?} is missing a port"))
        })?;

        let (start, end) = match port_part.split_once('-') {
            Some((a, b)) => (a, b),
            None => (port_part, port_part),
        };
        let start_port: u16 = start
            .parse()
            .map_err(|_| Error::Provision(format!("invalid port {start:?} in {addr:?}")))?;
        let end_port: u16 = end
            .parse()
            .map_err(|_| Error::Provision(format!("invalid port {end:?} in {addr:?}")))?;
        if end_port < start_port {
            return Err(Error::Provision(format!(
                "port range is backwards in {addr:?}"
            )));
        }

        Ok(Self {
            network,
            host: host.to_string(),
            start_port,
            end_port,
        })
    }

    pub fn is_unix(&self) -> bool {
        self.network.starts_with("unix")
    }

    pub fn port_range(&self) -> std::ops::RangeInclusive<u16> {
        self.start_port..=self.end_port
    }

    /// Number of listeners this address expands to.
    pub fn port_range_size(&self) -> usize {
        if self.is_unix() {
            1
        } else {
            (self.end_port - self.start_port) as usize + 1
        }
    }

    /// The same address pinned to a single `port`.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            network: self.network.clone(),
            host: self.host.clone(),
            start_port: port,
            end_port: port,
        }
    }

    /// Registry key for one concrete port of this address.
    pub fn key_at(&self, port: u16) -> String {
        if self.is_unix() {
            format!("{}/{}", self.network, self.host)
        } else {
            format!("{}/{}:{}", self.network, host_for_display(&self.host), port)
        }
    }

    /// The config-file form of this address; the default network is
    /// omitted the way operators write it.
    pub fn listen_string(&self) -> String {
        if self.is_unix() {
            return format!("{}/{}", self.network, self.host.trim_start_matches('/'));
        }
        let host = host_for_display(&self.host);
        let ports = if self.start_port == self.end_port {
            format!("{}", self.start_port)
        } else {
            format!("{}-{}", self.start_port, self.end_port)
        };
        if self.network == "tcp" {
            format!("{host}:{ports}")
        } else {
            format!("{}/{host}:{ports}", self.network)
        }
    }
}

impl std::fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unix() {
            return write!(f, "{}/{}", self.network, self.host);
        }
        write!(
            f,
            "{}/{}:{}",
            self.network,
            host_for_display(&self.host),
            if self.start_port == self.end_port {
                self.start_port.to_string()
            } else {
                format!("{}-{}", self.start_port, self.end_port)
            }
        )
    }
}

fn host_for_display(host: &str) -> String {
    if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

fn split_host_port(s: &str) -> Option<(&str, &str)> {
    if let Some(end) = s.find(']') {
        let host = s[..end].trim_start_matches('[');
        let port = s[end + 1..].strip_prefix(':')?;
        return Some((host, port));
    }
    let (host, port) = s.rsplit_once(':')?;
    Some((host, port))
}

/// A registry-owned TCP socket.
pub struct SharedListener {
    key: String,
    pub inner: tokio::net::TcpListener,
}

impl SharedListener {
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.inner.local_addr()
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for SharedListener {
    fn drop(&mut self) {
        let mut map = registry().lock();
        if map
            .get(&self.key)
            .is_some_and(|weak| weak.strong_count() == 0)
        {
            map.remove(&self.key);
        }
    }
}

fn registry() -> &'static Mutex<HashMap<String, Weak<SharedListener>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Weak<SharedListener>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Get or bind the stream listener for one concrete address.
pub async fn listen(addr: &NetworkAddress, port: u16) -> Result<Arc<SharedListener>> {
    if addr.is_unix() {
        return Err(Error::Provision(format!(
            "unix stream listeners are not supported for {addr}"
        )));
    }
    let key = addr.key_at(port);

    if let Some(existing) = registry().lock().get(&key).and_then(Weak::upgrade) {
        tracing::debug!(address = %key, "reusing existing listener");
        return Ok(existing);
    }

    let bind_host = if addr.host.is_empty() {
        "0.0.0.0"
    } else {
        addr.host.as_str()
    };
    let inner = tokio::net::TcpListener::bind((bind_host, port))
        .await
        .map_err(|source| Error::Listen {
            address: key.clone(),
            source,
        })?;

    let listener = Arc::new(SharedListener {
        key: key.clone(),
        inner,
    });
    registry().lock().insert(key, Arc::downgrade(&listener));
    Ok(listener)
}
