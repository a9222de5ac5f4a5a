//! Target strings: parsing, validation and canonical identity.
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

use tracing::warn;

use crate::error::TargetError;
use crate::ports::parse_port_list;

/// One endpoint to monitor. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    id: String,
    host: String,
    explicit_ports: Vec<u16>,
    ports: Vec<u16>,
}

impl Target {
    /// Parse a single target line, falling back to `default_ports` when the
    /// line does not carry its own port list.
    pub fn parse(line: &str, default_ports: &[u16]) -> Result<Self, TargetError> {
        let s = line.trim();
        if s.is_empty() {
            return Err(TargetError::Empty);
        }
        let (host, explicit_ports) = split_host_ports(s)?;
        validate_host(&host)?;

        let host = if is_ip_literal(&host) {
            host
        } else {
            host.to_ascii_lowercase()
        };
        let ports = if explicit_ports.is_empty() {
            default_ports.to_vec()
        } else {
            explicit_ports.clone()
        };
        let id = canonical_id(&host, &explicit_ports);
        Ok(Self {
            id,
            host,
            explicit_ports,
            ports,
        })
    }

    /// Canonical identity, e.g. `host`, `host:80,443` or `[fe80::1]:80`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Address handed to the probes (IP literal or hostname, no brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Effective TCP ports to scan.
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Ports written in the target line itself (empty when defaults apply).
    pub fn explicit_ports(&self) -> &[u16] {
        &self.explicit_ports
    }

    pub fn is_ipv6(&self) -> bool {
        is_ipv6_literal(&self.host)
    }

    /// Host formatted for use inside a URL (IPv6 literals get brackets).
    pub fn url_host(&self) -> String {
        format_host_for_url(&self.host)
    }

    fn dedup_key(&self) -> String {
        if self.host == "localhost" {
            "127.0.0.1".to_string()
        } else {
            self.host.clone()
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Outcome of parsing a whole target list. Nothing is dropped silently:
/// every line is either a target or a rejection with its reason.
#[derive(Debug, Default)]
pub struct ParsedTargets {
    pub targets: Vec<Target>,
    pub rejected: Vec<(String, TargetError)>,
}

/// Parse a list of target lines. Blank lines are skipped. Duplicate hosts
/// (with `localhost` equal to `127.0.0.1`) keep their first occurrence and
/// later lines are rejected as [`TargetError::Duplicate`].
pub fn parse_targets<I, S>(lines: I, default_ports: &[u16]) -> ParsedTargets
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = ParsedTargets::default();
    let mut seen = HashSet::new();

    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        match Target::parse(line, default_ports) {
            Ok(target) => {
                if seen.insert(target.dedup_key()) {
                    out.targets.push(target);
                } else {
                    warn!(line, host = target.host(), "duplicate target host");
                    out.rejected.push((
                        line.to_string(),
                        TargetError::Duplicate(target.host().to_string()),
                    ));
                }
            }
            Err(e) => out.rejected.push((line.to_string(), e)),
        }
    }
    out
}

/// Extract the host part from a target line without validating it.
pub fn extract_host(value: &str) -> &str {
    let s = value.trim();
    if let Some(rest) = s.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    if is_ip_literal(s) {
        return s;
    }
    match s.rsplit_once(':') {
        Some((host, _)) => host.trim(),
        None => s,
    }
}

pub fn format_host_for_url(host: &str) -> String {
    if is_ipv6_literal(host) {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

fn split_host_ports(s: &str) -> Result<(String, Vec<u16>), TargetError> {
    if let Some(inner) = s.strip_prefix('[') {
        let end = inner
            .find(']')
            .ok_or_else(|| TargetError::UnclosedBracket(s.to_string()))?;
        let host = inner[..end].trim().to_string();
        let rest = inner[end + 1..].trim();
        return match rest.strip_prefix(':') {
            Some(port_str) if !port_str.trim().is_empty() => Ok((host, parse_ports(port_str, s)?)),
            Some(_) => Ok((host, Vec::new())),
            None if rest.is_empty() => Ok((host, Vec::new())),
            None => Err(TargetError::TrailingText(s.to_string())),
        };
    }

    // Bare IP literals (including unbracketed IPv6) never carry ports.
    if is_ip_literal(s) {
        return Ok((s.to_string(), Vec::new()));
    }

    match s.rsplit_once(':') {
        Some((host, port_str)) => {
            let host = host.trim();
            if host.is_empty() || port_str.trim().is_empty() {
                return Err(TargetError::InvalidPorts(s.to_string()));
            }
            Ok((host.to_string(), parse_ports(port_str, s)?))
        }
        None => Ok((s.to_string(), Vec::new())),
    }
}

fn parse_ports(port_str: &str, line: &str) -> Result<Vec<u16>, TargetError> {
    parse_port_list(port_str).map_err(|_| TargetError::InvalidPorts(line.to_string()))
}

fn validate_host(host: &str) -> Result<(), TargetError> {
    if is_ip_literal(host) {
        return Ok(());
    }
    let invalid = |reason| TargetError::InvalidHost {
        host: host.to_string(),
        reason,
    };
    if host.is_empty() || host.len() > 253 {
        return Err(invalid("length must be 1-253 characters"));
    }
    for label in host.split('.') {
        if label.is_empty() {
            return Err(invalid("contains empty labels"));
        }
        if label.len() > 63 {
            return Err(invalid("has an invalid label length"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("has a label starting or ending with '-'"));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid("contains invalid characters"));
        }
    }
    Ok(())
}

fn canonical_id(host: &str, explicit_ports: &[u16]) -> String {
    if explicit_ports.is_empty() {
        return host.to_string();
    }
    let ports = explicit_ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("{}:{}", format_host_for_url(host), ports)
}

fn is_ip_literal(s: &str) -> bool {
    s.parse::<IpAddr>().is_ok() || is_ipv6_literal(s)
}

/// IPv6 literal, optionally with a `%zone` suffix.
fn is_ipv6_literal(s: &str) -> bool {
    let addr = s.split_once('%').map_or(s, |(a, _)| a);
    addr.parse::<Ipv6Addr>().is_ok()
}
