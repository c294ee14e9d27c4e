// Snapshot worker: a dedicated thread that ranks query candidates.
//
// The worker owns the newest snapshot of each kind it has been handed and
// nothing else. Three single-producer channels connect it to its owner:
//
// - snapshots (owner -> worker): `SnapshotUpdate`s from the registry's timers.
// - requests  (owner -> worker): `QueryRequest`s.
// - replies   (worker -> owner): `WorkerReply`s, drained by the registry on
//   the owning thread. Reply routing and every callback-like effect happen
//   there, never here.
//
// Loop shape: block on the request channel with `recv_timeout(sleep)`, which
// both caps CPU use and bounds shutdown latency. On wake, absorb every
// snapshot published since the last iteration (keeping the newest per kind),
// answer the request, then drain any further queued requests without
// sleeping. On timeout, absorb snapshots and loop. Requests are answered in
// dequeue order, exactly once each.
//
// There is no ordering promise between a snapshot and a query: a request is
// answered against whatever the worker absorbed last. Because the owner
// publishes and submits from one thread, a snapshot sent before a request is
// always visible by the time that request is received.
//
// `SnapshotWorker` is an owned handle. `spawn` starts the thread; `Drop`
// (or `stop`) clears the running flag and joins it. There is no separate
// init/shutdown pair to forget.

use crate::query::{self, QueryRequest, WorkerReply};
use crate::snapshot::{NodeSnapshot, SnapshotSet, SnapshotUpdate, StationSnapshot};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const WORKER_THREAD_NAME: &str = "forage-snapshot-worker";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn snapshot worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Owned handle to the background ranking thread.
pub struct SnapshotWorker {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    snapshots: Sender<SnapshotUpdate>,
    requests: Sender<QueryRequest>,
    replies: Receiver<WorkerReply>,
}

impl SnapshotWorker {
    /// Start the worker thread. `sleep` bounds how long the loop blocks
    /// waiting for a request before re-checking for snapshots and shutdown.
    pub fn spawn(sleep: Duration) -> Result<Self, WorkerError> {
        let (snapshot_tx, snapshot_rx) = mpsc::channel();
        let (request_tx, request_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let keep_running = Arc::new(AtomicBool::new(true));
        let keep_running_worker = keep_running.clone();

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || {
                run_worker(keep_running_worker, sleep, snapshot_rx, request_rx, reply_tx);
            })
            .map_err(WorkerError::Spawn)?;

        Ok(Self {
            keep_running,
            thread: Some(thread),
            snapshots: snapshot_tx,
            requests: request_tx,
            replies: reply_rx,
        })
    }

    /// Hand the worker a fresh snapshot. Returns false if the worker is gone.
    pub fn publish(&self, update: SnapshotUpdate) -> bool {
        self.snapshots.send(update).is_ok()
    }

    /// Enqueue a request. On failure the request is handed back so the
    /// caller can answer it itself.
    pub fn submit(&self, request: QueryRequest) -> Result<(), QueryRequest> {
        self.requests.send(request).map_err(|err| err.0)
    }

    /// Every reply that has arrived so far, in answer order.
    pub fn drain_replies(&self) -> Vec<WorkerReply> {
        self.replies.try_iter().collect()
    }

    /// Block up to `timeout` for the next reply.
    pub fn recv_reply_timeout(&self, timeout: Duration) -> Option<WorkerReply> {
        self.replies.recv_timeout(timeout).ok()
    }

    /// True while the thread is alive and has not been asked to stop.
    pub fn is_running(&self) -> bool {
        self.keep_running.load(Ordering::SeqCst)
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the worker to stop and wait for it. Idempotent.
    pub fn stop(&mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("snapshot worker thread panicked");
            }
        }
    }
}

impl Drop for SnapshotWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Newest snapshot of each kind seen by the worker.
#[derive(Default)]
struct Absorbed {
    resources: SnapshotSet<NodeSnapshot>,
    drop_offs: SnapshotSet<StationSnapshot>,
}

impl Absorbed {
    fn absorb(&mut self, snapshots: &Receiver<SnapshotUpdate>) {
        for update in snapshots.try_iter() {
            match update {
                SnapshotUpdate::Resources(set) => self.resources = set,
                SnapshotUpdate::DropOffs(set) => self.drop_offs = set,
            }
        }
    }

    fn reply_to(&self, request: QueryRequest) -> WorkerReply {
        let answer = query::answer(&request, &self.resources.rows, &self.drop_offs.rows);
        debug!(
            query = request.id.0,
            candidates = answer.len(),
            resource_snapshot_tick = self.resources.tick,
            drop_off_snapshot_tick = self.drop_offs.tick,
            "query answered"
        );
        WorkerReply {
            id: request.id,
            answer,
        }
    }
}

/// Main worker loop. Runs until `keep_running` is cleared or the owner's
/// end of a channel is dropped.
fn run_worker(
    keep_running: Arc<AtomicBool>,
    sleep: Duration,
    snapshots: Receiver<SnapshotUpdate>,
    requests: Receiver<QueryRequest>,
    replies: Sender<WorkerReply>,
) {
    info!(sleep_ms = sleep.as_millis() as u64, "snapshot worker started");
    let mut absorbed = Absorbed::default();

    'outer: while keep_running.load(Ordering::SeqCst) {
        match requests.recv_timeout(sleep) {
            Ok(request) => {
                absorbed.absorb(&snapshots);
                if replies.send(absorbed.reply_to(request)).is_err() {
                    break;
                }
                // Drain whatever else queued up while we were asleep.
                while let Ok(request) = requests.try_recv() {
                    if replies.send(absorbed.reply_to(request)).is_err() {
                        break 'outer;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => absorbed.absorb(&snapshots),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("snapshot worker stopped");
}
