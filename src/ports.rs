use anyhow::{bail, Context, Result};
use std::collections::HashSet;

/// Parse a comma-separated port list into deduplicated TCP ports (1..=65535).
///
/// Supported items:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - surrounding whitespace and empty items are ignored
///
/// Order of first appearance is preserved.
pub fn parse_port_list(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = HashSet::new();

    for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
        if let Some((a, b)) = item.split_once('-') {
            let start = parse_port_str(a.trim())
                .with_context(|| format!("invalid start in range: {item}"))?;
            let end = parse_port_str(b.trim())
                .with_context(|| format!("invalid end in range: {item}"))?;
            if start > end {
                bail!("invalid range {start}-{end} (start > end)");
            }
            for p in start..=end {
                if seen.insert(p) {
                    out.push(p);
                }
            }
            continue;
        }

        let p = parse_port_str(item).with_context(|| format!("invalid port value: {item}"))?;
        if seen.insert(p) {
            out.push(p);
        }
    }

    if out.is_empty() {
        bail!("empty port list");
    }
    Ok(out)
}

/// Ports probed for targets that do not list their own.
pub fn default_ports() -> Vec<u16> {
    vec![80, 443, 631]
}

/// Ports whose open state marks a target as serving a web UI.
pub fn default_web_ports() -> Vec<u16> {
    vec![80, 443]
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
