//! Helpers for consumers that open a browser on web-enabled targets.
use std::collections::BTreeMap;

use serde::Serialize;

use crate::target::{extract_host, format_host_for_url};
use crate::types::StatusRecord;

const PLAIN_HTTP_PORTS: [u16; 2] = [80, 8080];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebUiTarget {
    pub target_id: String,
    pub url: String,
}

/// Ids whose `web_port_open` went from false (or absent) to true.
pub fn web_port_transitions(
    before: &BTreeMap<String, StatusRecord>,
    after: &BTreeMap<String, StatusRecord>,
) -> Vec<String> {
    after
        .iter()
        .filter(|(id, rec)| rec.web_port_open && !before.get(*id).is_some_and(|b| b.web_port_open))
        .map(|(id, _)| id.clone())
        .collect()
}

/// Browser URL for a target with an open web port: plain HTTP when 80 or
/// 8080 is open, HTTPS otherwise.
pub fn web_ui_url(target_id: &str, record: &StatusRecord) -> Option<String> {
    if !record.web_port_open {
        return None;
    }
    let host = format_host_for_url(extract_host(target_id));
    let open = record.open_ports();
    if open.iter().any(|p| PLAIN_HTTP_PORTS.contains(p)) {
        Some(format!("http://{host}"))
    } else {
        Some(format!("https://{host}"))
    }
}

pub fn web_ui_targets(snapshot: &BTreeMap<String, StatusRecord>) -> Vec<WebUiTarget> {
    snapshot
        .iter()
        .filter_map(|(id, rec)| {
            web_ui_url(id, rec).map(|url| WebUiTarget {
                target_id: id.clone(),
                url,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PortState, PortStatuses, Status};

    fn web_record(ports: &[(u16, PortState)]) -> StatusRecord {
        StatusRecord {
            status: Status::Online,
            color: Status::Online.color(),
            port_statuses: Some(PortStatuses::from_iter(ports.iter().copied())),
            web_port_open: true,
            ..Default::default()
        }
    }

    #[test]
    fn scheme_follows_open_ports() {
        let http = web_record(&[(80, PortState::Open), (443, PortState::Open)]);
        assert_eq!(web_ui_url("printer.lan:80,443", &http).as_deref(), Some("http://printer.lan"));

        let https = web_record(&[(80, PortState::Closed), (443, PortState::Open)]);
        assert_eq!(web_ui_url("10.0.0.5", &https).as_deref(), Some("https://10.0.0.5"));

        let v6 = web_record(&[(8080, PortState::Open)]);
        assert_eq!(web_ui_url("[fe80::1]:8080", &v6).as_deref(), Some("http://[fe80::1]"));

        assert_eq!(web_ui_url("10.0.0.5", &StatusRecord::default()), None);
    }

    #[test]
    fn only_rising_edges_are_transitions() {
        let closed = StatusRecord::default();
        let open = web_record(&[(80, PortState::Open)]);
        let before = BTreeMap::from([("a".to_string(), closed.clone()), ("b".to_string(), open.clone())]);
        let after = BTreeMap::from([
            ("a".to_string(), open.clone()),
            ("b".to_string(), open.clone()),
            ("c".to_string(), open),
        ]);
        assert_eq!(web_port_transitions(&before, &after), vec!["a", "c"]);
        assert!(web_port_transitions(&after, &before).is_empty());
    }
}
