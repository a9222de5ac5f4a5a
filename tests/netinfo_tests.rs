use netpulse::netinfo::{detect_network_info, ipv4_subnet, NetworkInfo};
use std::net::{IpAddr, Ipv4Addr};

#[test]
fn subnet_is_network_address() {
    let net = ipv4_subnet(Ipv4Addr::new(192, 168, 42, 99), Ipv4Addr::new(255, 255, 255, 0)).unwrap();
    assert_eq!(net.to_string(), "192.168.42.0/24");
}

#[test]
fn detected_addresses_are_not_loopback() {
    let info = detect_network_info().expect("interfaces readable");
    if let Some(ip) = info.ipv4 {
        assert!(!ip.is_loopback());
        assert!(info.ipv4_subnet.unwrap().contains(&ip));
    }
    if let Some(ip) = info.ipv6 {
        assert!(!ip.is_loopback());
    }
}

#[test]
fn detected_ipv4_sits_on_the_gateway_subnet() {
    let info = detect_network_info().expect("interfaces readable");
    if let (Some(IpAddr::V4(gw)), Some(net)) = (info.gateway, info.ipv4_subnet) {
        // Routes through a point-to-point link can have a gateway off every subnet.
        if net.contains(&gw) {
            assert!(info.ipv4.is_some_and(|ip| net.contains(&ip)));
        }
    }
}

#[test]
fn network_info_serializes_gateway() {
    let info = NetworkInfo {
        gateway: Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))),
        ipv4_subnet: ipv4_subnet(Ipv4Addr::new(192, 168, 1, 7), Ipv4Addr::new(255, 255, 255, 0)),
        ..NetworkInfo::default()
    };
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["gateway"], "192.168.1.1");
    assert_eq!(json["ipv4_subnet"], "192.168.1.0/24");
    assert!(json["ipv4"].is_null());
}
