use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{udp_exchange, ServiceChecker};
use crate::types::CheckResult;

pub const MDNS_PORT: u16 = 5353;

const SERVICES_META_QUERY: &str = "_services._dns-sd._udp.local";
const TYPE_PTR: u16 = 12;
/// Class IN with the unicast-response ("QU") bit set.
const CLASS_IN_QU: u16 = 0x8001;

/// mDNS / DNS-SD availability probe (UDP/5353).
///
/// Sends the DNS-SD service enumeration query straight to the target's
/// 5353 port from an ephemeral port, which responders answer with a
/// unicast response echoing the query id.
#[derive(Debug, Clone)]
pub struct MdnsChecker {
    port: u16,
}

impl MdnsChecker {
    pub fn new() -> Self {
        Self { port: MDNS_PORT }
    }

    pub fn with_port(port: u16) -> Self {
        Self { port }
    }
}

impl Default for MdnsChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceChecker for MdnsChecker {
    fn name(&self) -> &str {
        "mdns"
    }

    fn port(&self) -> u16 {
        self.port
    }

    async fn check(&self, address: &str, timeout: Duration) -> CheckResult {
        let id: u16 = rand::random();
        let query = ptr_query(id, SERVICES_META_QUERY);
        let reply = match udp_exchange(address, self.port, &query, timeout).await {
            Ok(r) => r,
            Err(e) => return CheckResult::unavailable(e),
        };
        match parse_response(&reply.data, id) {
            Ok(answers) => {
                let mut info = reply.base_info();
                info.insert("answers".into(), json!(answers));
                CheckResult::available(info).with_rtt(reply.rtt)
            }
            Err(e) => CheckResult::unavailable(e),
        }
    }
}

/// Encode a single-question DNS query for `name`'s PTR records.
pub fn ptr_query(id: u16, name: &str) -> Vec<u8> {
    let mut msg = Vec::with_capacity(12 + name.len() + 6);
    msg.extend_from_slice(&id.to_be_bytes());
    msg.extend_from_slice(&0u16.to_be_bytes()); // flags: standard query
    msg.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    msg.extend_from_slice(&[0; 6]); // AN/NS/AR counts
    for label in name.split('.').filter(|l| !l.is_empty()) {
        msg.push(label.len() as u8);
        msg.extend_from_slice(label.as_bytes());
    }
    msg.push(0);
    msg.extend_from_slice(&TYPE_PTR.to_be_bytes());
    msg.extend_from_slice(&CLASS_IN_QU.to_be_bytes());
    msg
}

/// Check a reply is a DNS response to our query; returns ANCOUNT.
fn parse_response(data: &[u8], id: u16) -> Result<u16, String> {
    if data.len() < 12 {
        return Err("malformed mDNS reply: too short".into());
    }
    let reply_id = u16::from_be_bytes([data[0], data[1]]);
    // Multicast-style responses carry id 0.
    if reply_id != id && reply_id != 0 {
        return Err("malformed mDNS reply: id mismatch".into());
    }
    let flags = u16::from_be_bytes([data[2], data[3]]);
    if flags & 0x8000 == 0 {
        return Err("malformed mDNS reply: not a response".into());
    }
    Ok(u16::from_be_bytes([data[6], data[7]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::testutil::responder;

    #[test]
    fn query_encodes_labels_and_qu_bit() {
        let q = ptr_query(7, "_services._dns-sd._udp.local");
        assert_eq!(&q[0..2], &[0, 7]);
        assert_eq!(&q[4..6], &[0, 1]);
        assert_eq!(q[12], 9);
        assert_eq!(&q[13..22], b"_services");
        assert_eq!(&q[q.len() - 4..], &[0, 12, 0x80, 0x01]);
    }

    #[tokio::test]
    async fn response_with_answers_is_available() {
        let port = responder(|req| {
            let mut resp = req.to_vec();
            resp[2] = 0x84; // QR + AA
            resp[7] = 2; // ANCOUNT
            resp
        })
        .await;
        let res = MdnsChecker::with_port(port)
            .check("127.0.0.1", Duration::from_secs(1))
            .await;
        assert!(res.available, "{res:?}");
        assert_eq!(res.info.unwrap()["answers"], json!(2));
    }

    #[tokio::test]
    async fn echoed_query_is_not_a_response() {
        let port = responder(|req| req.to_vec()).await;
        let res = MdnsChecker::with_port(port)
            .check("127.0.0.1", Duration::from_secs(1))
            .await;
        assert!(!res.available);
        assert_eq!(res.error.as_deref(), Some("malformed mDNS reply: not a response"));
    }
}
