//! Per-target probe cycle.
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::checkers::{build_checkers, ServiceCheckManager, ServiceChecker};
use crate::config::{ProbeSettings, ServiceCheckPolicy};
use crate::ping::{PingOutcome, Pinger, SystemPing};
use crate::scanner::PortScanner;
use crate::target::Target;
use crate::types::{
    any_web_port_open, duration_ms, now_rfc3339, PortStatuses, ProbeResult, ServiceStatuses,
    Status,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Probing,
    Emitted,
}

/// The probes shared by every worker of a pool.
#[derive(Clone)]
pub struct ProbeKit {
    pub pinger: Arc<dyn Pinger>,
    pub services: Arc<ServiceCheckManager>,
}

impl ProbeKit {
    pub fn new(pinger: Arc<dyn Pinger>, checkers: Vec<Arc<dyn ServiceChecker>>) -> Self {
        Self {
            pinger,
            services: Arc::new(ServiceCheckManager::new(checkers)),
        }
    }

    /// System `ping` plus the configured UDP checkers, with result caching.
    pub fn from_settings(settings: &ProbeSettings) -> Self {
        let checkers = build_checkers(&settings.services, &settings.snmp_community);
        Self {
            pinger: Arc::new(SystemPing),
            services: Arc::new(
                ServiceCheckManager::new(checkers).with_cache_ttl(settings.service_cache_ttl),
            ),
        }
    }
}

/// Probes one target, one cycle per ping interval, and emits exactly one
/// fully populated [`ProbeResult`] per cycle.
pub struct ProbeWorker {
    target: Target,
    generation: u64,
    settings: Arc<ProbeSettings>,
    kit: ProbeKit,
    scanner: PortScanner,
    state: WorkerState,
    port_statuses: Option<PortStatuses>,
    service_statuses: Option<ServiceStatuses>,
}

impl ProbeWorker {
    pub fn new(target: Target, generation: u64, settings: Arc<ProbeSettings>, kit: ProbeKit) -> Self {
        let scanner = PortScanner::new(settings.connect_timeout);
        Self {
            target,
            generation,
            settings,
            kit,
            scanner,
            state: WorkerState::Idle,
            port_statuses: None,
            service_statuses: None,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run one probe cycle.
    ///
    /// Unreachable or failed pings carry the last known port and service
    /// maps forward; a reachable target gets a fresh scan and, depending on
    /// the service policy, a fresh round of service checks.
    pub async fn cycle(&mut self) -> ProbeResult {
        self.state = WorkerState::Probing;
        let host = self.target.host().to_string();
        let settings = Arc::clone(&self.settings);

        let outcome = AssertUnwindSafe(self.kit.pinger.measure(&host, settings.ping_timeout))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(target_id = %self.target, "ping probe panicked");
                PingOutcome::Failed("ping probe panicked".into())
            });

        let status = match &outcome {
            PingOutcome::Reachable { .. } => Status::Online,
            PingOutcome::Unreachable => Status::Offline,
            PingOutcome::Failed(reason) => {
                warn!(target_id = %self.target, reason, "ping could not run");
                Status::Error
            }
        };

        if status == Status::Online {
            self.probe_reachable(&host, &settings).await;
        } else if settings.scan_when_offline {
            self.port_statuses = Some(self.scanner.scan(&host, self.target.ports()).await);
        }

        let web_port_open = status == Status::Online
            && self
                .port_statuses
                .as_ref()
                .is_some_and(|p| any_web_port_open(p, &settings.web_ports));

        self.state = WorkerState::Emitted;
        ProbeResult {
            target_id: self.target.id().to_string(),
            generation: self.generation,
            status,
            color: status.color(),
            port_statuses: self.port_statuses.clone(),
            latency_ms: outcome.latency().map(duration_ms),
            web_port_open,
            udp_service_statuses: self.service_statuses.clone(),
            measured_at: now_rfc3339(),
        }
    }

    async fn probe_reachable(&mut self, host: &str, settings: &ProbeSettings) {
        let ports = self.target.ports();
        let services = &self.kit.services;
        match settings.service_policy {
            ServiceCheckPolicy::Always => {
                let (scanned, checked) = tokio::join!(
                    self.scanner.scan(host, ports),
                    services.run_all(host, settings.checker_timeout, settings.services_timeout),
                );
                self.port_statuses = Some(scanned);
                self.service_statuses = Some(checked);
            }
            ServiceCheckPolicy::WhenWebPortOpen => {
                let scanned = self.scanner.scan(host, ports).await;
                if any_web_port_open(&scanned, &settings.web_ports) {
                    self.service_statuses = Some(
                        services
                            .run_all(host, settings.checker_timeout, settings.services_timeout)
                            .await,
                    );
                }
                self.port_statuses = Some(scanned);
            }
        }
    }

    /// Cycle until `cancel` fires or the result channel closes.
    ///
    /// The first cycle starts immediately. `limiter` caps how many workers
    /// probe at the same time; cancellation drops an in-flight cycle at its
    /// next suspension point and nothing from it is emitted.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<ProbeResult>,
        cancel: CancellationToken,
        limiter: Arc<Semaphore>,
    ) {
        let mut timer = interval(self.settings.ping_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(target_id = %self.target, generation = self.generation, "worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&limiter).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.cycle() => result,
            };
            drop(permit);

            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = tx.send(result) => {
                    if sent.is_err() {
                        debug!(target_id = %self.target, "result channel closed");
                        break;
                    }
                }
            }
            self.state = WorkerState::Idle;
        }

        self.state = WorkerState::Idle;
        debug!(target_id = %self.target, generation = self.generation, "worker stopped");
    }
}
