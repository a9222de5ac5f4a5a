use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{udp_exchange, ServiceChecker};
use crate::types::CheckResult;

pub const SLP_PORT: u16 = 427;

const SLP_VERSION: u8 = 2;
const FN_SRV_RQST: u8 = 1;
const FN_SRV_RPLY: u8 = 2;
const FN_DA_ADVERT: u8 = 8;
const FN_SA_ADVERT: u8 = 11;
const HEADER_LEN: usize = 14;
const LANG: &[u8] = b"en";

/// Service Location Protocol v2 availability probe (UDP/427).
///
/// Sends a SrvRqst for `service:service-agent` and accepts any well-formed
/// SLPv2 answer carrying our XID. An agent replying with an SLP error code
/// still counts as available.
#[derive(Debug, Clone)]
pub struct SlpChecker {
    port: u16,
}

impl SlpChecker {
    pub fn new() -> Self {
        Self { port: SLP_PORT }
    }

    pub fn with_port(port: u16) -> Self {
        Self { port }
    }
}

impl Default for SlpChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceChecker for SlpChecker {
    fn name(&self) -> &str {
        "slp"
    }

    fn port(&self) -> u16 {
        self.port
    }

    async fn check(&self, address: &str, timeout: Duration) -> CheckResult {
        let xid: u16 = rand::random();
        let request = srv_rqst(xid, "service:service-agent", "DEFAULT");
        let reply = match udp_exchange(address, self.port, &request, timeout).await {
            Ok(r) => r,
            Err(e) => return CheckResult::unavailable(e),
        };
        match parse_reply(&reply.data, xid) {
            Ok((function, error_code)) => {
                let mut info = reply.base_info();
                info.insert("function".into(), json!(function_name(function)));
                if let Some(code) = error_code {
                    info.insert("error_code".into(), json!(code));
                }
                CheckResult::available(info).with_rtt(reply.rtt)
            }
            Err(e) => CheckResult::unavailable(e),
        }
    }
}

/// Encode an SLPv2 SrvRqst (RFC 2608 §8.1).
pub fn srv_rqst(xid: u16, service_type: &str, scope: &str) -> Vec<u8> {
    let mut body = Vec::new();
    push_string(&mut body, ""); // previous responder list
    push_string(&mut body, service_type);
    push_string(&mut body, scope);
    push_string(&mut body, ""); // predicate
    push_string(&mut body, ""); // SLP SPI

    let total = HEADER_LEN + LANG.len() + body.len();
    let mut msg = Vec::with_capacity(total);
    msg.push(SLP_VERSION);
    msg.push(FN_SRV_RQST);
    msg.extend_from_slice(&(total as u32).to_be_bytes()[1..]);
    msg.extend_from_slice(&[0x00, 0x00]); // flags: unicast, no overflow
    msg.extend_from_slice(&[0, 0, 0]); // next extension offset
    msg.extend_from_slice(&xid.to_be_bytes());
    msg.extend_from_slice(&(LANG.len() as u16).to_be_bytes());
    msg.extend_from_slice(LANG);
    msg.extend_from_slice(&body);
    msg
}

/// Validate a reply; returns the function id and, for SrvRply, its error code.
fn parse_reply(data: &[u8], xid: u16) -> Result<(u8, Option<u16>), String> {
    if data.len() < HEADER_LEN {
        return Err("malformed SLP reply: too short".into());
    }
    if data[0] != SLP_VERSION {
        return Err(format!("malformed SLP reply: version {}", data[0]));
    }
    let function = data[1];
    if !matches!(function, FN_SRV_RPLY | FN_DA_ADVERT | FN_SA_ADVERT) {
        return Err(format!("malformed SLP reply: unexpected function {function}"));
    }
    if u16::from_be_bytes([data[10], data[11]]) != xid {
        return Err("malformed SLP reply: XID mismatch".into());
    }
    let lang_len = u16::from_be_bytes([data[12], data[13]]) as usize;
    let body = HEADER_LEN + lang_len;
    let error_code = match function {
        FN_SRV_RPLY | FN_DA_ADVERT => data
            .get(body..body + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]])),
        _ => None,
    };
    Ok((function, error_code))
}

fn function_name(function: u8) -> &'static str {
    match function {
        FN_SRV_RPLY => "SrvRply",
        FN_DA_ADVERT => "DAAdvert",
        FN_SA_ADVERT => "SAAdvert",
        _ => "unknown",
    }
}

fn push_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::testutil::responder;

    fn srv_rply_for(request: &[u8], error_code: u16) -> Vec<u8> {
        let mut msg = vec![SLP_VERSION, FN_SRV_RPLY, 0, 0, 0, 0, 0, 0, 0, 0];
        msg.extend_from_slice(&request[10..12]); // echo XID
        msg.extend_from_slice(&[0, 2]);
        msg.extend_from_slice(LANG);
        msg.extend_from_slice(&error_code.to_be_bytes());
        msg.extend_from_slice(&[0, 0]); // URL entry count
        msg
    }

    #[test]
    fn request_header_is_consistent() {
        let req = srv_rqst(0xBEEF, "service:service-agent", "DEFAULT");
        assert_eq!(req[0], 2);
        assert_eq!(req[1], FN_SRV_RQST);
        let len = u32::from_be_bytes([0, req[2], req[3], req[4]]) as usize;
        assert_eq!(len, req.len());
        assert_eq!(&req[10..12], &[0xBE, 0xEF]);
        assert_eq!(&req[14..16], b"en");
    }

    #[tokio::test]
    async fn srv_rply_means_available() {
        let port = responder(|req| srv_rply_for(req, 4)).await;
        let res = SlpChecker::with_port(port)
            .check("127.0.0.1", Duration::from_secs(1))
            .await;
        assert!(res.available, "{res:?}");
        let info = res.info.unwrap();
        assert_eq!(info["function"], json!("SrvRply"));
        assert_eq!(info["error_code"], json!(4));
        assert!(res.rtt_ms.is_some());
    }

    #[tokio::test]
    async fn garbage_reply_is_unavailable_with_error() {
        let port = responder(|_| b"hello".to_vec()).await;
        let res = SlpChecker::with_port(port)
            .check("127.0.0.1", Duration::from_secs(1))
            .await;
        assert!(!res.available);
        assert!(res.error.unwrap().starts_with("malformed SLP reply"));
    }
}
