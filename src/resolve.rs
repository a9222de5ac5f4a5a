use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::lookup_host;
use tokio::time;

/// Resolve `host` to socket addresses (port 0), keeping IPv6 scope ids.
/// Duplicates are removed; resolver order is preserved.
pub(crate) async fn resolve_host(host: &str, timeout: Duration) -> io::Result<Vec<SocketAddr>> {
    let lookup = lookup_host((host, 0));
    let addrs = time::timeout(timeout, lookup)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "name resolution timed out"))??;

    let mut out: Vec<SocketAddr> = Vec::new();
    for addr in addrs {
        if !out.contains(&addr) {
            out.push(addr);
        }
    }
    if out.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses found for {host}"),
        ));
    }
    Ok(out)
}

/// Same addresses with the given port.
pub(crate) fn with_port(addrs: &[SocketAddr], port: u16) -> Vec<SocketAddr> {
    addrs
        .iter()
        .map(|a| {
            let mut a = *a;
            a.set_port(port);
            a
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_ip_literals() {
        let addrs = resolve_host("127.0.0.1", Duration::from_secs(1)).await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:0".parse().unwrap()]);
        let v6 = resolve_host("::1", Duration::from_secs(1)).await.unwrap();
        assert!(v6[0].is_ipv6());
    }

    #[test]
    fn port_is_applied_to_every_address() {
        let addrs: Vec<SocketAddr> = vec!["10.0.0.1:0".parse().unwrap(), "[::1]:0".parse().unwrap()];
        let ported = with_port(&addrs, 443);
        assert!(ported.iter().all(|a| a.port() == 443));
    }
}
