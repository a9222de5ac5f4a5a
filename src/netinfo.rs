use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use anyhow::Result;
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::Ipv4Net;
use serde::Serialize;
use tracing::debug;

/// This host's primary addresses, shown next to the monitored targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv4_subnet: Option<Ipv4Net>,
    pub ipv6: Option<Ipv6Addr>,
    pub gateway: Option<IpAddr>,
}

/// One address of one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfaceAddr {
    pub name: String,
    pub ip: IpAddr,
    /// Only set for IPv4.
    pub netmask: Option<Ipv4Addr>,
}

/// Detect the default gateway and the addresses of the interface that
/// reaches it. Without a gateway, the first non-loopback IPv4 address and
/// the first global IPv6 address are used.
pub fn detect_network_info() -> Result<NetworkInfo> {
    let addrs: Vec<IfaceAddr> = get_if_addrs()?
        .into_iter()
        .map(|iface| match iface.addr {
            IfAddr::V4(v4) => IfaceAddr {
                name: iface.name,
                ip: IpAddr::V4(v4.ip),
                netmask: Some(v4.netmask),
            },
            IfAddr::V6(v6) => IfaceAddr {
                name: iface.name,
                ip: IpAddr::V6(v6.ip),
                netmask: None,
            },
        })
        .collect();
    Ok(network_info_from(&addrs, default_gateway()))
}

fn default_gateway() -> Option<IpAddr> {
    match netdev::get_default_gateway() {
        Ok(gw) => gw
            .ipv4
            .first()
            .copied()
            .map(IpAddr::V4)
            .or_else(|| gw.ipv6.first().copied().map(IpAddr::V6)),
        Err(e) => {
            debug!(error = %e, "no default gateway");
            None
        }
    }
}

/// Pick the primary addresses from `addrs`, preferring the interface whose
/// IPv4 subnet contains `gateway`.
pub fn network_info_from(addrs: &[IfaceAddr], gateway: Option<IpAddr>) -> NetworkInfo {
    let primary = gateway.and_then(|gw| match gw {
        IpAddr::V4(gw) => addrs.iter().find(|a| match (a.ip, a.netmask) {
            (IpAddr::V4(ip), Some(mask)) => ipv4_subnet(ip, mask).is_some_and(|net| net.contains(&gw)),
            _ => false,
        }),
        IpAddr::V6(_) => None,
    });

    let mut info = NetworkInfo {
        gateway,
        ..NetworkInfo::default()
    };
    if let Some(primary) = primary {
        let on_primary: Vec<&IfaceAddr> = addrs.iter().filter(|a| a.name == primary.name).collect();
        fill(&mut info, on_primary.iter().copied().filter(|a| a.ip == primary.ip));
        fill(&mut info, on_primary.iter().copied());
    }
    fill(&mut info, addrs.iter());
    info
}

/// Set whichever address families are still missing from the first usable entries.
fn fill<'a>(info: &mut NetworkInfo, addrs: impl Iterator<Item = &'a IfaceAddr>) {
    for addr in addrs {
        match addr.ip {
            IpAddr::V4(ip) if info.ipv4.is_none() && !ip.is_loopback() => {
                info.ipv4 = Some(ip);
                info.ipv4_subnet = addr.netmask.and_then(|mask| ipv4_subnet(ip, mask));
            }
            IpAddr::V6(ip) if info.ipv6.is_none() && is_global_v6(ip) => {
                info.ipv6 = Some(ip);
            }
            _ => {}
        }
    }
}

/// Network containing `ip` for the given netmask, e.g. `192.168.1.0/24`.
pub fn ipv4_subnet(ip: Ipv4Addr, netmask: Ipv4Addr) -> Option<Ipv4Net> {
    Ipv4Net::with_netmask(ip, netmask).ok().map(|net| net.trunc())
}

fn is_global_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let link_local = first & 0xffc0 == 0xfe80;
    let unique_local = first & 0xfe00 == 0xfc00;
    !(ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() || link_local || unique_local)
}
