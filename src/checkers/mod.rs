//! UDP service checkers.
//!
//! Every checker implements [`ServiceChecker`]: one request out, at most one
//! reply in, bounded by the caller's timeout, and every failure folded into
//! the returned [`CheckResult`]. [`ServiceCheckManager`] runs a set of them
//! against one address concurrently.
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::net::UdpSocket;
use tokio::time::{self, Instant};

use crate::resolve::{resolve_host, with_port};
use crate::types::CheckResult;

pub mod manager;
pub mod mdns;
pub mod slp;
pub mod snmp;
pub mod wsdiscovery;

pub use manager::ServiceCheckManager;
pub use mdns::MdnsChecker;
pub use slp::SlpChecker;
pub use snmp::SnmpChecker;
pub use wsdiscovery::WsDiscoveryChecker;

#[async_trait]
pub trait ServiceChecker: Send + Sync {
    /// Key under which this checker's result is reported.
    fn name(&self) -> &str;

    /// UDP port the probe is sent to.
    fn port(&self) -> u16;

    /// Probe `address`. Never fails: errors end up in [`CheckResult::error`].
    async fn check(&self, address: &str, timeout: Duration) -> CheckResult;
}

/// The known UDP services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Slp,
    Mdns,
    WsDiscovery,
    Snmp,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::Slp,
        ServiceKind::Mdns,
        ServiceKind::WsDiscovery,
        ServiceKind::Snmp,
    ];

    pub fn from_port(port: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.port() == port)
    }

    pub fn port(self) -> u16 {
        match self {
            ServiceKind::Slp => slp::SLP_PORT,
            ServiceKind::Mdns => mdns::MDNS_PORT,
            ServiceKind::WsDiscovery => wsdiscovery::WS_DISCOVERY_PORT,
            ServiceKind::Snmp => snmp::SNMP_PORT,
        }
    }

    /// Result key, e.g. `snmp`.
    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::Slp => "slp",
            ServiceKind::Mdns => "mdns",
            ServiceKind::WsDiscovery => "ws-discovery",
            ServiceKind::Snmp => "snmp",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ServiceKind::Slp => "SLP",
            ServiceKind::Mdns => "mDNS",
            ServiceKind::WsDiscovery => "WS-Discovery",
            ServiceKind::Snmp => "SNMP",
        }
    }

    pub fn checker(self, snmp_community: &str) -> Arc<dyn ServiceChecker> {
        match self {
            ServiceKind::Slp => Arc::new(SlpChecker::new()),
            ServiceKind::Mdns => Arc::new(MdnsChecker::new()),
            ServiceKind::WsDiscovery => Arc::new(WsDiscoveryChecker::new()),
            ServiceKind::Snmp => Arc::new(SnmpChecker::new(snmp_community)),
        }
    }
}

/// Build the checker set for the configured services, in configured order.
pub fn build_checkers(kinds: &[ServiceKind], snmp_community: &str) -> Vec<Arc<dyn ServiceChecker>> {
    kinds.iter().map(|k| k.checker(snmp_community)).collect()
}

/// A single datagram received in answer to a probe.
#[derive(Debug, Clone)]
pub(crate) struct UdpReply {
    pub from: SocketAddr,
    pub data: Vec<u8>,
    pub rtt: Duration,
}

impl UdpReply {
    /// `from` / `bytes` details shared by every checker's info map.
    pub fn base_info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert("from".into(), json!(self.from.to_string()));
        info.insert("bytes".into(), json!(self.data.len()));
        info
    }
}

/// Send `payload` to `address:port` and wait for one reply.
///
/// IPv6 addresses are tried before IPv4, each with an equal share of the
/// budget; the whole exchange, name resolution included, never outlasts
/// `timeout`.
pub(crate) async fn udp_exchange(
    address: &str,
    port: u16,
    payload: &[u8],
    timeout: Duration,
) -> Result<UdpReply, String> {
    let deadline = Instant::now() + timeout;
    match time::timeout_at(deadline, exchange(address, port, payload, deadline)).await {
        Ok(res) => res,
        Err(_) => Err("timeout".into()),
    }
}

async fn exchange(
    address: &str,
    port: u16,
    payload: &[u8],
    deadline: Instant,
) -> Result<UdpReply, String> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    let mut addrs = resolve_host(address, remaining)
        .await
        .map_err(|e| format!("DNS error: {e}"))?;
    addrs.sort_by_key(SocketAddr::is_ipv4);
    let addrs = with_port(&addrs, port);

    let mut last_error = String::from("timeout");
    for (i, addr) in addrs.iter().enumerate() {
        let left = deadline.saturating_duration_since(Instant::now());
        let share = left / (addrs.len() - i) as u32;
        match exchange_one(*addr, payload, share).await {
            Ok(reply) => return Ok(reply),
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}

async fn exchange_one(addr: SocketAddr, payload: &[u8], budget: Duration) -> Result<UdpReply, String> {
    let bind: SocketAddr = if addr.is_ipv6() {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    };
    let sock = UdpSocket::bind(bind)
        .await
        .map_err(|e| format!("socket error: {e}"))?;
    // Connected so that ICMP port-unreachable surfaces as an error and
    // datagrams from other hosts are filtered out.
    sock.connect(addr)
        .await
        .map_err(|e| format!("socket error: {e}"))?;

    let start = Instant::now();
    sock.send(payload)
        .await
        .map_err(|e| format!("send failed: {e}"))?;

    let mut buf = vec![0u8; 4096];
    match time::timeout(budget, sock.recv(&mut buf)).await {
        Err(_) => Err("timeout".into()),
        Ok(Err(e)) => Err(format!("receive failed: {e}")),
        Ok(Ok(n)) => {
            buf.truncate(n);
            Ok(UdpReply {
                from: addr,
                data: buf,
                rtt: start.elapsed(),
            })
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_well_known_ports() {
        assert_eq!(ServiceKind::from_port(427), Some(ServiceKind::Slp));
        assert_eq!(ServiceKind::from_port(5353), Some(ServiceKind::Mdns));
        assert_eq!(ServiceKind::from_port(3702), Some(ServiceKind::WsDiscovery));
        assert_eq!(ServiceKind::from_port(161), Some(ServiceKind::Snmp));
        assert_eq!(ServiceKind::from_port(53), None);
    }

    #[test]
    fn built_checkers_keep_order_and_names() {
        let checkers = build_checkers(&[ServiceKind::Snmp, ServiceKind::Slp], "public");
        let names: Vec<_> = checkers.iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["snmp", "slp"]);
        assert_eq!(checkers[0].port(), 161);
    }

    #[tokio::test]
    async fn exchange_returns_reply() {
        let port = testutil::responder(|req| req.iter().rev().copied().collect()).await;
        let reply = udp_exchange("127.0.0.1", port, b"abc", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.data, b"cba");
        assert_eq!(reply.base_info()["bytes"], json!(3));
    }

    #[tokio::test]
    async fn exchange_without_reply_times_out_on_budget() {
        // Bound but silent socket.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();
        let start = Instant::now();
        let err = udp_exchange("127.0.0.1", port, b"x", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err, "timeout");
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
