//! Remote-IP matcher.

use std::any::Any;
use std::net::IpAddr;
use std::sync::Arc;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};

use crate::context::RequestCtx;
use crate::error::{Error, Result};
use crate::module::Registry;

use super::RequestMatcher;

/// Matches the peer address against CIDR ranges; bare addresses are
/// treated as single-host ranges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchRemoteIp {
    #[serde(default)]
    ranges: Vec<String>,
    #[serde(skip)]
    nets: Vec<IpNet>,
}

impl MatchRemoteIp {
    pub fn provision(&mut self) -> Result<()> {
        self.nets.clear();
        for raw in &self.ranges {
            let net = if raw.contains('/') {
                raw.parse::<IpNet>()
                    .map_err(|e| Error::Provision(format!("parsing CIDR {raw:?}: {e}")))?
            } else {
                let ip: IpAddr = raw
                    .parse()
                    .map_err(|e| Error::Provision(format!("parsing IP {raw:?}: {e}")))?;
                match ip {
                    IpAddr::V4(v4) => IpNet::V4(
                        Ipv4Net::new(v4, 32).expect("/32 is a valid prefix"),
                    ),
                    IpAddr::V6(v6) => IpNet::V6(
                        Ipv6Net::new(v6, 128).expect("/128 is a valid prefix"),
                    ),
                }
            };
            self.nets.push(net);
        }
        Ok(())
    }
}

impl RequestMatcher for MatchRemoteIp {
    fn is_match(&self, r: &mut RequestCtx) -> bool {
        let ip = r.remote_addr.ip();
        self.nets.iter().any(|net| net.contains(&ip))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn ctor(
    config: serde_json::Value,
    _registry: &Registry,
) -> Result<Arc<dyn RequestMatcher>> {
    let mut m: MatchRemoteIp = super::decode("remote_ip", config)?;
    m.provision()?;
    Ok(Arc::new(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testutil::ctx;

    #[test]
    fn cidrs_and_bare_addresses() {
        let mut m: MatchRemoteIp = serde_json::from_str(
            r#"{"ranges": ["203.0.113.0/24", "198.51.100.7"]}"#,
        )
        .unwrap();
        m.provision().unwrap();

        // test contexts use remote 203.0.113.9
        assert!(m.is_match(&mut ctx("GET", "/", "h")));

        let mut r = ctx("GET", "/", "h");
        r.remote_addr = "198.51.100.7:1234".parse().unwrap();
        assert!(m.is_match(&mut r));

        let mut r = ctx("GET", "/", "h");
        r.remote_addr = "198.51.100.8:1234".parse().unwrap();
        assert!(!m.is_match(&mut r));
    }

    #[test]
    fn bad_ranges_fail_provisioning() {
        let mut m: MatchRemoteIp =
            serde_json::from_str(r#"{"ranges": ["not-an-ip"]}"#).unwrap();
        assert!(m.provision().is_err());
    }
}
