use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{udp_exchange, ServiceChecker};
use crate::types::CheckResult;

pub const SNMP_PORT: u16 = 161;

/// sysDescr.0
pub const SYS_DESCR_OID: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];

const SNMP_V2C: i64 = 1;

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_GET_REQUEST: u8 = 0xa0;
const TAG_GET_RESPONSE: u8 = 0xa2;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;

/// SNMPv2c availability probe: GET `sysDescr.0` (UDP/161).
#[derive(Debug, Clone)]
pub struct SnmpChecker {
    community: String,
    port: u16,
}

impl SnmpChecker {
    pub fn new(community: impl Into<String>) -> Self {
        Self {
            community: community.into(),
            port: SNMP_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

#[async_trait]
impl ServiceChecker for SnmpChecker {
    fn name(&self) -> &str {
        "snmp"
    }

    fn port(&self) -> u16 {
        self.port
    }

    async fn check(&self, address: &str, timeout: Duration) -> CheckResult {
        let request_id = i64::from(rand::random::<u16>()) + 1;
        let request = get_request(&self.community, request_id, SYS_DESCR_OID);
        let reply = match udp_exchange(address, self.port, &request, timeout).await {
            Ok(r) => r,
            Err(e) => return CheckResult::unavailable(e),
        };

        let response = match parse_get_response(&reply.data) {
            Ok(r) => r,
            Err(e) => return CheckResult::unavailable(format!("malformed SNMP reply: {e}")),
        };
        if response.request_id != request_id {
            return CheckResult::unavailable("malformed SNMP reply: request-id mismatch");
        }
        if response.error_status != 0 {
            return CheckResult::unavailable(format!(
                "SNMP error status {} at index {}",
                response.error_status, response.error_index
            ));
        }

        let mut info = reply.base_info();
        info.insert("oid".into(), json!(format_oid(SYS_DESCR_OID)));
        info.insert("value".into(), json!(response.value));
        CheckResult::available(info).with_rtt(reply.rtt)
    }
}

/// Decoded fields of a GetResponse-PDU with a single varbind.
#[derive(Debug, Clone, PartialEq)]
pub struct GetResponse {
    pub request_id: i64,
    pub error_status: i64,
    pub error_index: i64,
    /// String value of the first varbind; `None` for noSuchObject and friends.
    pub value: Option<String>,
}

/// Encode an SNMPv2c GetRequest for one OID.
pub fn get_request(community: &str, request_id: i64, oid: &[u32]) -> Vec<u8> {
    let varbind = tlv(TAG_SEQUENCE, &[tlv(TAG_OID, &encode_oid(oid)), tlv(TAG_NULL, &[])].concat());
    let varbinds = tlv(TAG_SEQUENCE, &varbind);
    let pdu = tlv(
        TAG_GET_REQUEST,
        &[
            tlv(TAG_INTEGER, &encode_integer(request_id)),
            tlv(TAG_INTEGER, &encode_integer(0)),
            tlv(TAG_INTEGER, &encode_integer(0)),
            varbinds,
        ]
        .concat(),
    );
    tlv(
        TAG_SEQUENCE,
        &[
            tlv(TAG_INTEGER, &encode_integer(SNMP_V2C)),
            tlv(TAG_OCTET_STRING, community.as_bytes()),
            pdu,
        ]
        .concat(),
    )
}

pub fn parse_get_response(data: &[u8]) -> Result<GetResponse, String> {
    let mut top = Ber::new(data);
    let mut msg = Ber::new(top.expect(TAG_SEQUENCE)?);
    msg.integer()?; // version
    msg.expect(TAG_OCTET_STRING)?; // community
    let mut pdu = Ber::new(msg.expect(TAG_GET_RESPONSE)?);
    let request_id = pdu.integer()?;
    let error_status = pdu.integer()?;
    let error_index = pdu.integer()?;

    let mut varbinds = Ber::new(pdu.expect(TAG_SEQUENCE)?);
    let value = if varbinds.is_empty() {
        None
    } else {
        let mut varbind = Ber::new(varbinds.expect(TAG_SEQUENCE)?);
        varbind.expect(TAG_OID)?;
        let (tag, content) = varbind.next()?;
        match tag {
            TAG_OCTET_STRING => Some(String::from_utf8_lossy(content).into_owned()),
            TAG_INTEGER => Some(decode_integer(content)?.to_string()),
            TAG_NO_SUCH_OBJECT | TAG_NO_SUCH_INSTANCE | TAG_END_OF_MIB_VIEW | TAG_NULL => None,
            other => Some(format!("<tag 0x{other:02x}, {} bytes>", content.len())),
        }
    };

    Ok(GetResponse {
        request_id,
        error_status,
        error_index,
        value,
    })
}

pub fn format_oid(oid: &[u32]) -> String {
    oid.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
    out
}

/// Minimal two's-complement big-endian encoding.
fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn decode_integer(content: &[u8]) -> Result<i64, String> {
    if content.is_empty() || content.len() > 8 {
        return Err(format!("bad integer length {}", content.len()));
    }
    let negative = content[0] & 0x80 != 0;
    let mut value: i64 = if negative { -1 } else { 0 };
    for &b in content {
        value = (value << 8) | i64::from(b);
    }
    Ok(value)
}

fn encode_oid(oid: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    if oid.len() < 2 {
        return out;
    }
    push_base128(&mut out, oid[0] * 40 + oid[1]);
    for &arc in &oid[2..] {
        push_base128(&mut out, arc);
    }
    out
}

fn push_base128(out: &mut Vec<u8>, mut value: u32) {
    let mut tmp = vec![(value & 0x7f) as u8];
    value >>= 7;
    while value > 0 {
        tmp.push((value & 0x7f) as u8 | 0x80);
        value >>= 7;
    }
    tmp.reverse();
    out.extend_from_slice(&tmp);
}

/// Cursor over a run of BER TLVs.
struct Ber<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Ber<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn next(&mut self) -> Result<(u8, &'a [u8]), String> {
        let tag = *self.data.get(self.pos).ok_or("truncated tag")?;
        let first = *self.data.get(self.pos + 1).ok_or("truncated length")? as usize;
        let mut cursor = self.pos + 2;
        let len = if first & 0x80 == 0 {
            first
        } else {
            let n = first & 0x7f;
            if n == 0 || n > 4 {
                return Err(format!("unsupported length form 0x{first:02x}"));
            }
            let bytes = self
                .data
                .get(cursor..cursor + n)
                .ok_or("truncated length")?;
            cursor += n;
            bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize)
        };
        let content = self
            .data
            .get(cursor..cursor + len)
            .ok_or("truncated content")?;
        self.pos = cursor + len;
        Ok((tag, content))
    }

    fn expect(&mut self, tag: u8) -> Result<&'a [u8], String> {
        let (found, content) = self.next()?;
        if found != tag {
            return Err(format!("expected tag 0x{tag:02x}, found 0x{found:02x}"));
        }
        Ok(content)
    }

    fn integer(&mut self) -> Result<i64, String> {
        decode_integer(self.expect(TAG_INTEGER)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::testutil::responder;

    /// Build the GetResponse an agent would send for `request`.
    fn response_for(request: &[u8], error_status: i64, descr: &str) -> Vec<u8> {
        let mut top = Ber::new(request);
        let mut msg = Ber::new(top.expect(TAG_SEQUENCE).unwrap());
        msg.integer().unwrap();
        let community = msg.expect(TAG_OCTET_STRING).unwrap();
        let mut pdu = Ber::new(msg.expect(TAG_GET_REQUEST).unwrap());
        let request_id = pdu.integer().unwrap();

        let varbind = tlv(
            TAG_SEQUENCE,
            &[
                tlv(TAG_OID, &encode_oid(SYS_DESCR_OID)),
                tlv(TAG_OCTET_STRING, descr.as_bytes()),
            ]
            .concat(),
        );
        let pdu = tlv(
            TAG_GET_RESPONSE,
            &[
                tlv(TAG_INTEGER, &encode_integer(request_id)),
                tlv(TAG_INTEGER, &encode_integer(error_status)),
                tlv(TAG_INTEGER, &encode_integer(0)),
                tlv(TAG_SEQUENCE, &varbind),
            ]
            .concat(),
        );
        tlv(
            TAG_SEQUENCE,
            &[
                tlv(TAG_INTEGER, &encode_integer(SNMP_V2C)),
                tlv(TAG_OCTET_STRING, community),
                pdu,
            ]
            .concat(),
        )
    }

    #[test]
    fn request_matches_reference_encoding() {
        let req = get_request("public", 1, SYS_DESCR_OID);
        let expected: &[u8] = &[
            0x30, 0x26, 0x02, 0x01, 0x01, 0x04, 0x06, b'p', b'u', b'b', b'l', b'i', b'c', 0xa0,
            0x19, 0x02, 0x01, 0x01, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30, 0x0e, 0x30, 0x0c,
            0x06, 0x08, 0x2b, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00, 0x05, 0x00,
        ];
        assert_eq!(req, expected);
    }

    #[test]
    fn integers_use_minimal_encoding() {
        assert_eq!(encode_integer(0), vec![0x00]);
        assert_eq!(encode_integer(127), vec![0x7f]);
        assert_eq!(encode_integer(128), vec![0x00, 0x80]);
        assert_eq!(encode_integer(-1), vec![0xff]);
        assert_eq!(decode_integer(&[0x00, 0x80]).unwrap(), 128);
        assert_eq!(decode_integer(&[0xff]).unwrap(), -1);
    }

    #[test]
    fn long_form_lengths_round_trip() {
        let descr = "x".repeat(300);
        let req = get_request("public", 42, SYS_DESCR_OID);
        let resp = parse_get_response(&response_for(&req, 0, &descr)).unwrap();
        assert_eq!(resp.request_id, 42);
        assert_eq!(resp.value.as_deref(), Some(descr.as_str()));
    }

    #[test]
    fn truncated_reply_is_an_error() {
        let req = get_request("public", 42, SYS_DESCR_OID);
        let resp = response_for(&req, 0, "printer");
        assert!(parse_get_response(&resp[..resp.len() - 3]).is_err());
        assert!(parse_get_response(&[0x30]).is_err());
    }

    #[tokio::test]
    async fn agent_reply_is_available_with_sys_descr() {
        let port = responder(|req| response_for(req, 0, "HP LaserJet")).await;
        let res = SnmpChecker::new("public")
            .with_port(port)
            .check("127.0.0.1", Duration::from_secs(1))
            .await;
        assert!(res.available, "{res:?}");
        let info = res.info.unwrap();
        assert_eq!(info["value"], json!("HP LaserJet"));
        assert_eq!(info["oid"], json!("1.3.6.1.2.1.1.1.0"));
    }

    #[tokio::test]
    async fn error_status_is_unavailable() {
        let port = responder(|req| response_for(req, 2, "")).await;
        let res = SnmpChecker::new("public")
            .with_port(port)
            .check("127.0.0.1", Duration::from_secs(1))
            .await;
        assert!(!res.available);
        assert_eq!(res.error.as_deref(), Some("SNMP error status 2 at index 0"));
    }

    #[tokio::test]
    async fn malformed_reply_is_unavailable() {
        let port = responder(|_| vec![0x30, 0x05, 0x02]).await;
        let res = SnmpChecker::new("public")
            .with_port(port)
            .check("127.0.0.1", Duration::from_secs(1))
            .await;
        assert!(!res.available);
        assert!(res.error.unwrap().starts_with("malformed SNMP reply"));
    }
}
