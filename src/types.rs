use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use ::time::{format_description::well_known, OffsetDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Liveness verdict for one target.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Pinging,
    Online,
    Offline,
    Error,
}

impl Status {
    pub fn color(self) -> StatusColor {
        match self {
            Status::Pinging => StatusColor::Gray,
            Status::Online => StatusColor::Green,
            Status::Offline => StatusColor::Red,
            Status::Error => StatusColor::Orange,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Pinging => write!(f, "Pinging"),
            Status::Online => write!(f, "Online"),
            Status::Offline => write!(f, "Offline"),
            Status::Error => write!(f, "Error"),
        }
    }
}

/// Presentation hint derived from [`Status`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    #[default]
    Gray,
    Green,
    Red,
    Orange,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
}

impl PortState {
    pub fn is_open(self) -> bool {
        matches!(self, PortState::Open)
    }
}

impl From<bool> for PortState {
    fn from(open: bool) -> Self {
        if open {
            PortState::Open
        } else {
            PortState::Closed
        }
    }
}

pub type PortStatuses = BTreeMap<u16, PortState>;
pub type ServiceStatuses = BTreeMap<String, CheckResult>;

/// A service checker's verdict.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<f64>,
}

impl CheckResult {
    pub fn available(info: Map<String, Value>) -> Self {
        Self {
            available: true,
            info: Some(info),
            error: None,
            rtt_ms: None,
        }
    }

    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            available: false,
            info: None,
            error: Some(error.into()),
            rtt_ms: None,
        }
    }

    pub fn timeout() -> Self {
        Self::unavailable("timeout")
    }

    pub fn with_rtt(mut self, rtt: Duration) -> Self {
        self.rtt_ms = Some(duration_ms(rtt));
        self
    }
}

/// The canonical, always fully populated view of one target.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct StatusRecord {
    pub status: Status,
    pub color: StatusColor,
    /// Round-trip time of the last successful ping; only set while Online.
    pub latency_ms: Option<f64>,
    /// `None` until the first port scan completes.
    pub port_statuses: Option<PortStatuses>,
    pub web_port_open: bool,
    /// `None` until the first service-check round completes.
    pub udp_service_statuses: Option<ServiceStatuses>,
    pub updated_at: Option<String>,
}

impl StatusRecord {
    /// `12.3ms`, or an empty string when there is no latency to show.
    pub fn latency_label(&self) -> String {
        self.latency_ms
            .map(|ms| format!("{ms:.1}ms"))
            .unwrap_or_default()
    }

    pub fn open_ports(&self) -> Vec<u16> {
        self.port_statuses
            .iter()
            .flatten()
            .filter(|(_, s)| s.is_open())
            .map(|(p, _)| *p)
            .collect()
    }
}

/// One emission of a probe worker. Every field is populated on every
/// emission; values not re-measured this cycle are carried forward.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub target_id: String,
    /// Registration epoch of the worker that produced this result.
    pub generation: u64,
    pub status: Status,
    pub color: StatusColor,
    pub port_statuses: Option<PortStatuses>,
    pub latency_ms: Option<f64>,
    pub web_port_open: bool,
    pub udp_service_statuses: Option<ServiceStatuses>,
    pub measured_at: String,
}

/// Whether any of `web_ports` is open in `ports`.
pub fn any_web_port_open(ports: &PortStatuses, web_ports: &[u16]) -> bool {
    web_ports
        .iter()
        .any(|p| ports.get(p).is_some_and(|s| s.is_open()))
}

pub fn duration_ms(d: Duration) -> f64 {
    (d.as_secs_f64() * 10_000.0).round() / 10.0
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
