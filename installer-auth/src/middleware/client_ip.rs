//! Client address resolution behind reverse proxies.

use axum::http::HeaderMap;
use std::net::IpAddr;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IpNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    fn parse(entry: &str) -> Option<Self> {
        let (addr, prefix) = match entry.split_once('/') {
            Some((addr, prefix)) => (addr.trim().parse::<IpAddr>().ok()?, Some(prefix.trim())),
            None => (entry.parse::<IpAddr>().ok()?, None),
        };
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max)?,
            None => max,
        };
        Some(Self { addr, prefix })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                prefix_match(u32::from(net) as u128, u32::from(ip) as u128, self.prefix, 32)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                prefix_match(u128::from(net), u128::from(ip), self.prefix, 128)
            }
            _ => false,
        }
    }
}

fn prefix_match(net: u128, ip: u128, prefix: u8, width: u32) -> bool {
    if prefix == 0 {
        return true;
    }
    let shift = width - u32::from(prefix);
    (net >> shift) == (ip >> shift)
}

/// Peers whose forwarding headers are believed.
///
/// Built from a comma separated list of CIDRs and bare addresses. An empty
/// list trusts no one, so headers are ignored and the socket peer is used.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyChecker {
    networks: Vec<IpNetwork>,
}

impl TrustedProxyChecker {
    pub fn parse(list: &str) -> Self {
        let networks = list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| {
                let network = IpNetwork::parse(entry);
                if network.is_none() {
                    tracing::warn!(entry, "Ignoring invalid trusted proxy entry");
                }
                network
            })
            .collect();
        Self { networks }
    }

    pub fn is_trusted(&self, peer: IpAddr) -> bool {
        self.networks.iter().any(|network| network.contains(peer))
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

/// The originating client address for lockout accounting.
///
/// `X-Forwarded-For` (first entry), then `X-Real-IP`, are honoured only when
/// the direct peer is a trusted proxy and the value parses as an address.
pub fn extract_client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    proxies: &TrustedProxyChecker,
) -> Option<String> {
    if let Some(peer_ip) = peer
        && proxies.is_trusted(peer_ip)
        && let Some(forwarded) = forwarded_ip(headers)
    {
        return Some(forwarded.to_string());
    }
    peer.map(|ip| ip.to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(xff) = header(X_FORWARDED_FOR) {
        return xff.split(',').next()?.trim().parse().ok();
    }
    header(X_REAL_IP)?.trim().parse().ok()
}
