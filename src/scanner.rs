use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;
use tracing::debug;

use crate::resolve::{resolve_host, with_port};
use crate::types::{PortState, PortStatuses};

/// TCP connect prober for one target's port list.
#[derive(Debug, Clone)]
pub struct PortScanner {
    connect_timeout: Duration,
    concurrency: usize,
}

impl PortScanner {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            concurrency: 256,
        }
    }

    /// Scan `ports` on `host` using asynchronous TCP connects.
    ///
    /// - Resolves the host once; an unresolvable host reports every port closed.
    /// - Limits concurrent socket attempts using a `Semaphore`.
    /// - Uses `tokio::time::timeout` to bound each port's connect time,
    ///   trying every resolved address within that budget.
    /// - Always returns exactly one entry per requested port.
    pub async fn scan(&self, host: &str, ports: &[u16]) -> PortStatuses {
        let mut out: PortStatuses = ports.iter().map(|&p| (p, PortState::Closed)).collect();
        if ports.is_empty() {
            return out;
        }

        let addrs = match resolve_host(host, self.connect_timeout).await {
            Ok(addrs) => Arc::new(addrs),
            Err(e) => {
                debug!(host, error = %e, "cannot resolve host, reporting all ports closed");
                return out;
            }
        };

        let sem = Arc::new(Semaphore::new(self.concurrency.clamp(1, 5_000)));
        let mut set = JoinSet::new();
        let timeout = self.connect_timeout;

        for &port in out.keys() {
            let Ok(permit) = sem.clone().acquire_owned().await else {
                break;
            };
            let targets = with_port(&addrs, port);
            set.spawn(async move {
                let _permit = permit; // keep permit until task completes
                let open = time::timeout(timeout, connect_any(&targets))
                    .await
                    .unwrap_or(false);
                (port, PortState::from(open))
            });
        }

        while let Some(res) = set.join_next().await {
            if let Ok((port, state)) = res {
                out.insert(port, state);
            }
        }
        out
    }
}

async fn connect_any(addrs: &[SocketAddr]) -> bool {
    for addr in addrs {
        if TcpStream::connect(addr).await.is_ok() {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn open_and_closed_ports_on_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        // Bind then drop to get a port that is very likely closed.
        let closed = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };

        let scanner = PortScanner::new(Duration::from_millis(500));
        let res = scanner.scan("127.0.0.1", &[open, closed]).await;
        assert_eq!(res.len(), 2);
        assert_eq!(res[&open], PortState::Open);
        assert_eq!(res[&closed], PortState::Closed);
    }

    #[tokio::test]
    async fn unresolvable_host_reports_every_port_closed() {
        let scanner = PortScanner::new(Duration::from_millis(500));
        let res = scanner.scan("does-not-exist.invalid", &[80, 443]).await;
        assert_eq!(
            res,
            PortStatuses::from([(80, PortState::Closed), (443, PortState::Closed)])
        );
    }

    #[tokio::test]
    async fn empty_port_list_is_empty_map() {
        let scanner = PortScanner::new(Duration::from_millis(100));
        assert!(scanner.scan("127.0.0.1", &[]).await.is_empty());
    }
}
