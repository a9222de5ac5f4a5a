//! Reachability and latency measurement.
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time;
use tracing::trace;

/// Result of one reachability probe.
#[derive(Debug, Clone, PartialEq)]
pub enum PingOutcome {
    Reachable { latency: Duration },
    Unreachable,
    /// The probe itself could not run (e.g. no `ping` binary).
    Failed(String),
}

impl PingOutcome {
    pub fn reachable(&self) -> bool {
        matches!(self, PingOutcome::Reachable { .. })
    }

    pub fn latency(&self) -> Option<Duration> {
        match self {
            PingOutcome::Reachable { latency } => Some(*latency),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Pinger: Send + Sync {
    /// Issue a single probe. Must not block past `timeout`.
    async fn measure(&self, address: &str, timeout: Duration) -> PingOutcome;
}

/// ICMP echo through the operating system's `ping` utility, which avoids
/// needing raw-socket privileges in this process.
#[derive(Debug, Clone, Default)]
pub struct SystemPing;

#[async_trait]
impl Pinger for SystemPing {
    async fn measure(&self, address: &str, timeout: Duration) -> PingOutcome {
        let mut cmd = Command::new("ping");
        cmd.args(ping_args(address, timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let start = Instant::now();
        let output = match time::timeout(timeout, cmd.output()).await {
            Err(_) => return PingOutcome::Unreachable,
            Ok(Err(e)) => return PingOutcome::Failed(format!("cannot run ping: {e}")),
            Ok(Ok(output)) => output,
        };
        let elapsed = start.elapsed();

        if !output.status.success() {
            trace!(address, status = ?output.status, "ping reported no reply");
            return PingOutcome::Unreachable;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let latency = parse_latency(&stdout).unwrap_or(elapsed);
        PingOutcome::Reachable { latency }
    }
}

fn ping_args(address: &str, timeout: Duration) -> Vec<String> {
    let ipv6 = address.contains(':');
    let mut args: Vec<String> = Vec::new();
    if cfg!(windows) {
        args.extend(["-n", "1", "-w"].map(String::from));
        args.push(timeout.as_millis().max(1).to_string());
        if ipv6 {
            args.push("-6".into());
        }
    } else if cfg!(target_os = "macos") {
        args.extend(["-c", "1", "-W"].map(String::from));
        args.push(timeout.as_millis().max(1).to_string());
    } else {
        // iputils takes whole seconds for -W.
        let secs = timeout.as_secs_f64().ceil().max(1.0) as u64;
        args.extend(["-c", "1", "-W"].map(String::from));
        args.push(secs.to_string());
        if ipv6 {
            args.push("-6".into());
        }
    }
    args.push(address.to_string());
    args
}

/// Extract the round-trip time from `ping` output: `time=12.3 ms`,
/// `time=0.045ms` or Windows' `time<1ms`.
pub fn parse_latency(output: &str) -> Option<Duration> {
    let idx = output.find("time=").or_else(|| output.find("time<"))?;
    let rest = &output[idx + 5..];
    let num: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let ms: f64 = num.parse().ok()?;
    Some(Duration::from_micros((ms * 1000.0).round() as u64))
}
