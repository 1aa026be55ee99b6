//! Per-job progress distribution.
//!
//! Replaces a process-wide event emitter with an explicit registry keyed by
//! job id: consumers subscribe to one job, and their subscription unregisters
//! itself on drop, so an abandoned stream can never leak. The bus holds no
//! history: a subscriber that arrives after an event fired will not see it;
//! the persisted job/entity rows are the durable source of truth.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum JobEvent {
    Progress { percent: i32, stage: String },
    Completed { result: Value },
    Failed { error: String },
}

impl JobEvent {
    /// Event name on the wire (SSE `event:` field).
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Progress { .. } => "progress",
            JobEvent::Completed { .. } => "complete",
            JobEvent::Failed { .. } => "failed",
        }
    }

    pub fn data(&self) -> Value {
        match self {
            JobEvent::Progress { percent, stage } => {
                json!({ "percent": percent, "stage": stage })
            }
            JobEvent::Completed { result } => json!({ "result": result }),
            JobEvent::Failed { error } => json!({ "error": error }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Failed { .. })
    }
}

struct Slot {
    id: u64,
    tx: mpsc::UnboundedSender<JobEvent>,
}

#[derive(Default)]
pub struct ProgressBus {
    next_id: AtomicU64,
    inner: Mutex<HashMap<Uuid, Vec<Slot>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register for one job's events. The returned handle unsubscribes when
    /// dropped, which is the mandatory teardown path for disconnecting
    /// consumers.
    pub fn subscribe(self: Arc<Self>, job_id: Uuid) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let slot_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut inner = self.inner.lock().expect("bus lock poisoned");
            inner.entry(job_id).or_default().push(Slot { id: slot_id, tx });
        }

        Subscription {
            bus: self,
            job_id,
            slot_id,
            rx,
        }
    }

    /// Deliver an event to this job's current subscribers. Closed receivers
    /// are pruned; a terminal event clears the job's registry entry outright,
    /// so finished jobs never accumulate state here.
    pub fn publish(&self, job_id: Uuid, event: JobEvent) {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        let Some(slots) = inner.get_mut(&job_id) else {
            return;
        };

        slots.retain(|slot| slot.tx.send(event.clone()).is_ok());

        if event.is_terminal() || slots.is_empty() {
            inner.remove(&job_id);
        }
    }

    pub fn subscriber_count(&self, job_id: Uuid) -> usize {
        self.inner
            .lock()
            .expect("bus lock poisoned")
            .get(&job_id)
            .map(|slots| slots.len())
            .unwrap_or(0)
    }

    /// Number of jobs with at least one live subscriber (leak check).
    pub fn tracked_jobs(&self) -> usize {
        self.inner.lock().expect("bus lock poisoned").len()
    }

    fn unsubscribe(&self, job_id: Uuid, slot_id: u64) {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        if let Some(slots) = inner.get_mut(&job_id) {
            slots.retain(|slot| slot.id != slot_id);
            if slots.is_empty() {
                inner.remove(&job_id);
            }
        }
    }
}

pub struct Subscription {
    bus: Arc<ProgressBus>,
    job_id: Uuid,
    slot_id: u64,
    rx: mpsc::UnboundedReceiver<JobEvent>,
}

impl Subscription {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Next event, or None once the bus has dropped this job (terminal event
    /// published) and the backlog is drained.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.job_id, self.slot_id);
    }
}
