//! Live set of probe workers, keyed by target id.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregator::{SharedRecords, StatusAggregator};
use crate::config::ProbeSettings;
use crate::target::Target;
use crate::types::ProbeResult;
use crate::worker::{ProbeKit, ProbeWorker};

/// What an [`WorkerPool::update_targets`] call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

struct WorkerHandle {
    generation: u64,
    host: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct WorkerPool {
    settings: Arc<ProbeSettings>,
    kit: ProbeKit,
    records: SharedRecords,
    tx: mpsc::Sender<ProbeResult>,
    limiter: Arc<Semaphore>,
    workers: HashMap<String, WorkerHandle>,
    retired: Vec<JoinHandle<()>>,
    next_generation: u64,
    cancel: CancellationToken,
    running: bool,
}

impl WorkerPool {
    /// A stopped pool feeding `aggregator`.
    pub fn new(settings: ProbeSettings, kit: ProbeKit, aggregator: &StatusAggregator) -> Self {
        let limiter = Arc::new(Semaphore::new(settings.max_concurrent_targets.max(1)));
        Self {
            settings: Arc::new(settings),
            kit,
            records: aggregator.records(),
            tx: aggregator.sender(),
            limiter,
            workers: HashMap::new(),
            retired: Vec::new(),
            next_generation: 1,
            cancel: CancellationToken::new(),
            running: false,
        }
    }

    /// Start one worker per target, each with a fresh default record.
    pub async fn start(&mut self, targets: Vec<Target>) -> TargetDiff {
        self.running = true;
        self.update_targets(targets).await
    }

    /// Reconcile the live workers with `targets`.
    ///
    /// Workers of removed targets are cancelled and their records dropped
    /// right away; new targets get a default record and a worker; unchanged
    /// targets keep running untouched. Calling this on a stopped pool starts it.
    pub async fn update_targets(&mut self, targets: Vec<Target>) -> TargetDiff {
        self.running = true;
        self.retired.retain(|task| !task.is_finished());

        let mut wanted = HashSet::new();
        let mut fresh = Vec::new();
        let mut diff = TargetDiff::default();
        for target in targets {
            if !wanted.insert(target.id().to_string()) {
                continue;
            }
            if self.workers.contains_key(target.id()) {
                diff.unchanged.push(target.id().to_string());
            } else {
                fresh.push(target);
            }
        }

        let mut gone: Vec<String> = self
            .workers
            .keys()
            .filter(|id| !wanted.contains(*id))
            .cloned()
            .collect();
        gone.sort();
        for id in gone {
            if let Some(worker) = self.workers.remove(&id) {
                worker.cancel.cancel();
                self.kit.services.forget(&worker.host).await;
                self.retired.push(worker.task);
            }
            self.records.unregister(&id).await;
            info!(target_id = %id, "target removed");
            diff.removed.push(id);
        }

        // Records left behind by a stopped pool have no worker to cancel.
        for id in self.records.retain(&wanted).await {
            info!(target_id = %id, "stale record removed");
            diff.removed.push(id);
        }
        diff.removed.sort();

        for target in fresh {
            diff.added.push(target.id().to_string());
            self.spawn(target).await;
        }
        diff
    }

    async fn spawn(&mut self, target: Target) {
        let generation = self.next_generation;
        self.next_generation += 1;
        let id = target.id().to_string();
        let host = target.host().to_string();
        self.records.register(&id, generation).await;

        let cancel = self.cancel.child_token();
        let worker = ProbeWorker::new(target, generation, Arc::clone(&self.settings), self.kit.clone());
        let task = tokio::spawn(worker.run(self.tx.clone(), cancel.clone(), Arc::clone(&self.limiter)));
        info!(target_id = %id, generation, "target added");
        self.workers.insert(
            id,
            WorkerHandle {
                generation,
                host,
                cancel,
                task,
            },
        );
    }

    /// Cancel every worker and wait until all of them, including ones
    /// retired by earlier updates, have exited. Records are kept.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        let tasks = self
            .workers
            .drain()
            .map(|(_, w)| w.task)
            .chain(self.retired.drain(..));
        for task in tasks.collect::<Vec<_>>() {
            if let Err(e) = task.await {
                warn!(error = %e, "worker task ended abnormally");
            }
        }
        self.cancel = CancellationToken::new();
        self.running = false;
        info!("worker pool stopped");
    }

    pub fn target_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Registration epoch of `id`'s current worker.
    pub fn generation(&self, id: &str) -> Option<u64> {
        self.workers.get(id).map(|w| w.generation)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
