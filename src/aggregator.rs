//! Single owner of the canonical target → status mapping.
//!
//! Workers push [`ProbeResult`]s into one channel; the aggregator drains it
//! and replaces every field of the matching record under one write lock, so
//! readers only ever see whole records.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, RwLock};
use tracing::{trace, warn};

use crate::types::{now_rfc3339, ProbeResult, StatusRecord};

#[derive(Debug)]
struct Slot {
    generation: u64,
    record: StatusRecord,
}

/// Cloneable handle to the record table.
///
/// The pool registers and unregisters targets through it; consumers read
/// snapshots. Only [`StatusAggregator`] merges measurements into it.
#[derive(Debug, Clone, Default)]
pub struct SharedRecords {
    inner: Arc<RwLock<HashMap<String, Slot>>>,
}

impl SharedRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) `id`'s record with defaults, owned by `generation`.
    pub async fn register(&self, id: &str, generation: u64) {
        self.inner.write().await.insert(
            id.to_string(),
            Slot {
                generation,
                record: StatusRecord::default(),
            },
        );
    }

    pub async fn unregister(&self, id: &str) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, StatusRecord> {
        self.inner
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.record.clone()))
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<StatusRecord> {
        self.inner.read().await.get(id).map(|s| s.record.clone())
    }

    /// Drop every record whose id is not in `keep`. Returns the dropped ids, sorted.
    pub async fn retain(&self, keep: &HashSet<String>) -> Vec<String> {
        let mut records = self.inner.write().await;
        let mut dropped: Vec<String> = records.keys().filter(|id| !keep.contains(*id)).cloned().collect();
        for id in &dropped {
            records.remove(id);
        }
        dropped.sort();
        dropped
    }
}

/// Many-producer, single-consumer merge point for probe results.
pub struct StatusAggregator {
    tx: mpsc::Sender<ProbeResult>,
    rx: mpsc::Receiver<ProbeResult>,
    records: SharedRecords,
    changes: watch::Sender<u64>,
}

impl StatusAggregator {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (changes, _) = watch::channel(0);
        Self {
            tx,
            rx,
            records: SharedRecords::new(),
            changes,
        }
    }

    /// Producer side of the result channel.
    pub fn sender(&self) -> mpsc::Sender<ProbeResult> {
        self.tx.clone()
    }

    pub fn records(&self) -> SharedRecords {
        self.records.clone()
    }

    /// Change counter, bumped after every drain that updated something.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, StatusRecord> {
        self.records.snapshot().await
    }

    /// Merge everything currently queued. Returns the ids that changed, in
    /// first-update order. An empty queue returns an empty list without
    /// touching the records.
    pub async fn drain_and_merge(&mut self) -> Vec<String> {
        let mut batch = Vec::new();
        while let Ok(result) = self.rx.try_recv() {
            batch.push(result);
        }
        self.merge_batch(batch).await
    }

    /// Wait for at least one result, then drain everything queued.
    pub async fn merge_next(&mut self) -> Vec<String> {
        // The aggregator keeps a sender of its own, so the channel stays open.
        let Some(first) = self.rx.recv().await else {
            return Vec::new();
        };
        let mut batch = vec![first];
        while let Ok(result) = self.rx.try_recv() {
            batch.push(result);
        }
        self.merge_batch(batch).await
    }

    async fn merge_batch(&self, batch: Vec<ProbeResult>) -> Vec<String> {
        if batch.is_empty() {
            return Vec::new();
        }
        let mut updated: Vec<String> = Vec::new();
        {
            let mut records = self.records.inner.write().await;
            for result in batch {
                let Some(slot) = records.get_mut(&result.target_id) else {
                    trace!(target_id = %result.target_id, "dropping result for unregistered target");
                    continue;
                };
                if slot.generation != result.generation {
                    trace!(
                        target_id = %result.target_id,
                        generation = result.generation,
                        current = slot.generation,
                        "dropping result from a retired worker"
                    );
                    continue;
                }
                let id = result.target_id.clone();
                merge_into(&mut slot.record, result);
                if !updated.contains(&id) {
                    updated.push(id);
                }
            }
        }
        if !updated.is_empty() {
            self.changes.send_modify(|n| *n = n.wrapping_add(1));
        }
        updated
    }
}

/// Replace every field of `record` with the result's values.
///
/// Workers always carry forward what they did not re-measure, so a `None`
/// arriving over a known port or service map is a producer fault; the prior
/// value is kept rather than blanking it.
fn merge_into(record: &mut StatusRecord, result: ProbeResult) {
    let port_statuses = match (result.port_statuses, record.port_statuses.take()) {
        (Some(new), _) => Some(new),
        (None, Some(prior)) => {
            warn!(target_id = %result.target_id, "result without port statuses, keeping prior values");
            Some(prior)
        }
        (None, None) => None,
    };
    let udp_service_statuses = match (result.udp_service_statuses, record.udp_service_statuses.take()) {
        (Some(new), _) => Some(new),
        (None, Some(prior)) => {
            warn!(target_id = %result.target_id, "result without service statuses, keeping prior values");
            Some(prior)
        }
        (None, None) => None,
    };

    *record = StatusRecord {
        status: result.status,
        color: result.color,
        latency_ms: result.latency_ms,
        port_statuses,
        web_port_open: result.web_port_open,
        udp_service_statuses,
        updated_at: Some(if result.measured_at.is_empty() {
            now_rfc3339()
        } else {
            result.measured_at
        }),
    };
}
