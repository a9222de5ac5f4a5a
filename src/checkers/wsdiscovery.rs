use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use super::{udp_exchange, ServiceChecker};
use crate::types::CheckResult;

pub const WS_DISCOVERY_PORT: u16 = 3702;

/// WS-Discovery availability probe (SOAP-over-UDP, UDP/3702).
///
/// Sends a unicast Probe; any SOAP envelope in reply counts, and
/// `info.probe_matches` tells whether it was a proper ProbeMatches.
#[derive(Debug, Clone)]
pub struct WsDiscoveryChecker {
    port: u16,
}

impl WsDiscoveryChecker {
    pub fn new() -> Self {
        Self {
            port: WS_DISCOVERY_PORT,
        }
    }

    pub fn with_port(port: u16) -> Self {
        Self { port }
    }
}

impl Default for WsDiscoveryChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceChecker for WsDiscoveryChecker {
    fn name(&self) -> &str {
        "ws-discovery"
    }

    fn port(&self) -> u16 {
        self.port
    }

    async fn check(&self, address: &str, timeout: Duration) -> CheckResult {
        let message_id = format!("uuid:{}", Uuid::new_v4());
        let probe = probe_message(&message_id);
        let reply = match udp_exchange(address, self.port, probe.as_bytes(), timeout).await {
            Ok(r) => r,
            Err(e) => return CheckResult::unavailable(e),
        };

        let text = String::from_utf8_lossy(&reply.data);
        if !text.contains("Envelope") {
            return CheckResult::unavailable("malformed WS-Discovery reply: no SOAP envelope");
        }
        let mut info = reply.base_info();
        info.insert("probe_matches".into(), json!(text.contains("ProbeMatches")));
        info.insert("relates_to_probe".into(), json!(text.contains(&message_id)));
        CheckResult::available(info).with_rtt(reply.rtt)
    }
}

pub fn probe_message(message_id: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<e:Envelope xmlns:e=\"http://www.w3.org/2003/05/soap-envelope\" \
xmlns:w=\"http://schemas.xmlsoap.org/ws/2004/08/addressing\" \
xmlns:d=\"http://schemas.xmlsoap.org/ws/2005/04/discovery\">\
<e:Header>\
<w:MessageID>{message_id}</w:MessageID>\
<w:To>urn:schemas-xmlsoap-org:ws:2005:04:discovery</w:To>\
<w:Action>http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</w:Action>\
</e:Header>\
<e:Body><d:Probe/></e:Body>\
</e:Envelope>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::testutil::responder;

    #[test]
    fn probe_carries_message_id() {
        let msg = probe_message("uuid:1234");
        assert!(msg.contains("<w:MessageID>uuid:1234</w:MessageID>"));
        assert!(msg.contains("<d:Probe/>"));
    }

    #[tokio::test]
    async fn probe_matches_reply_is_available() {
        let port = responder(|req| {
            let req = String::from_utf8_lossy(req);
            let start = req.find("uuid:").unwrap();
            let end = req[start..].find('<').unwrap() + start;
            format!(
                "<s:Envelope><s:Header><a:RelatesTo>{}</a:RelatesTo></s:Header>\
                 <s:Body><d:ProbeMatches/></s:Body></s:Envelope>",
                &req[start..end]
            )
            .into_bytes()
        })
        .await;
        let res = WsDiscoveryChecker::with_port(port)
            .check("127.0.0.1", Duration::from_secs(1))
            .await;
        assert!(res.available, "{res:?}");
        let info = res.info.unwrap();
        assert_eq!(info["probe_matches"], json!(true));
        assert_eq!(info["relates_to_probe"], json!(true));
    }

    #[tokio::test]
    async fn non_soap_reply_is_unavailable() {
        let port = responder(|_| b"\x00\x01binary".to_vec()).await;
        let res = WsDiscoveryChecker::with_port(port)
            .check("127.0.0.1", Duration::from_secs(1))
            .await;
        assert!(!res.available);
        assert!(res.error.unwrap().contains("no SOAP envelope"));
    }
}
