//! Bounded worker pool
//!
//! Owns a fixed set of runner slots fed from a bounded dispatch queue,
//! applies the foreground-deadline promotion protocol, routes typed worker
//! events to the task store, health-checks stuck jobs, and replaces dead
//! slots so the live count stays at the configured size.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::events::{RunResult, WorkerEvent};
use crate::runner::{OutputSink, RunRequest, ScriptRunner};
use crate::task_store::{TaskStore, SHUTDOWN_REASON};

/// Reason recorded on tasks killed by the health check.
pub const HEALTH_KILL_REASON: &str = "Worker timeout — killed by health check";

/// Reason recorded on tasks whose worker slot died underneath them.
const WORKER_CRASH_REASON: &str = "Worker crashed";

/// The caller-visible outcome of a dispatch.
#[derive(Debug)]
pub enum ExecuteOutcome {
    /// The child finished inside the foreground deadline.
    Completed(RunResult),

    /// The foreground deadline elapsed first (or the job was explicitly
    /// backgrounded); execution continues under the hard ceiling and the
    /// final result lands in the task store.
    Backgrounded { task_id: u64 },
}

/// Who receives the final result. The sender is taken exactly once: by the
/// completion path (synchronous reply) or by the promotion path (which
/// drops it, leaving the task store as the only destination).
type Reply = Arc<Mutex<Option<oneshot::Sender<RunResult>>>>;

struct Job {
    id: u64,
    task_id: u64,
    request: RunRequest,
    reply: Reply,
}

struct ActiveJob {
    task_id: u64,
    slot: usize,
    started: Instant,
    reply: Reply,
}

struct Slot {
    id: usize,
    handle: JoinHandle<()>,
}

struct PoolShared {
    config: PoolConfig,
    store: Arc<TaskStore>,
    runner: ScriptRunner,
    queue_tx: mpsc::Sender<Job>,
    queue_rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
    active: Mutex<HashMap<u64, ActiveJob>>,
    slots: Mutex<Vec<Slot>>,
    next_job_id: AtomicU64,
    next_slot_id: AtomicUsize,
    shutting_down: AtomicBool,
}

/// Fixed-size pool of runner slots with a bounded queue.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<WorkerEvent>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    health: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig, store: Arc<TaskStore>) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.max_queue.max(1));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let runner = ScriptRunner::new(config.runner.clone());

        Self {
            shared: Arc::new(PoolShared {
                config,
                store,
                runner,
                queue_tx,
                queue_rx: Arc::new(Mutex::new(queue_rx)),
                event_tx,
                active: Mutex::new(HashMap::new()),
                slots: Mutex::new(Vec::new()),
                next_job_id: AtomicU64::new(0),
                next_slot_id: AtomicUsize::new(0),
                shutting_down: AtomicBool::new(false),
            }),
            event_rx: Mutex::new(Some(event_rx)),
            event_loop: Mutex::new(None),
            health: Mutex::new(None),
        }
    }

    /// Spawn the worker slots, the event loop, and the health check.
    pub async fn start(&self) {
        info!(
            workers = self.shared.config.worker_count,
            "starting worker pool"
        );

        {
            let mut slots = self.shared.slots.lock().await;
            for _ in 0..self.shared.config.worker_count {
                slots.push(spawn_slot(&self.shared));
            }
        }

        if let Some(rx) = self.event_rx.lock().await.take() {
            *self.event_loop.lock().await = Some(tokio::spawn(event_loop(self.shared.clone(), rx)));
        }
        *self.health.lock().await = Some(tokio::spawn(health_loop(self.shared.clone())));
    }

    /// Dispatch one job.
    ///
    /// With `foreground` set, waits up to that deadline for a synchronous
    /// result and promotes to a background task when it elapses. With
    /// `foreground` absent the job is backgrounded immediately. Either way
    /// the child runs under the pool's hard ceiling.
    pub async fn execute(
        &self,
        task_id: u64,
        source: String,
        language: String,
        working_dir: PathBuf,
        foreground: Option<Duration>,
    ) -> Result<ExecuteOutcome, PoolError> {
        let shared = &self.shared;

        if shared.shutting_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown);
        }
        if shared.slots.lock().await.is_empty() {
            return Err(PoolError::NoWorkers);
        }

        let job_id = shared.next_job_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (reply, rx) = match foreground {
            Some(_) => {
                let (tx, rx) = oneshot::channel();
                (Arc::new(Mutex::new(Some(tx))), Some(rx))
            }
            None => (Arc::new(Mutex::new(None)), None),
        };

        let job = Job {
            id: job_id,
            task_id,
            request: RunRequest {
                source,
                language,
                working_dir,
                deadline: shared.config.hard_ceiling,
            },
            reply: reply.clone(),
        };

        shared.queue_tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => PoolError::QueueOverflow,
            TrySendError::Closed(_) => PoolError::ShuttingDown,
        })?;

        let (Some(deadline), Some(mut rx)) = (foreground, rx) else {
            debug!(job_id, task_id, "job dispatched to background");
            return Ok(ExecuteOutcome::Backgrounded { task_id });
        };

        tokio::select! {
            res = &mut rx => Ok(ExecuteOutcome::Completed(finish(res))),
            _ = tokio::time::sleep(deadline) => {
                // Promotion race: whoever takes the reply sender decides the
                // route. If the completion path got there first, the result
                // is already on its way through the channel.
                let taken = reply.lock().await.take();
                if taken.is_some() {
                    // a still-queued job counts as started once promoted
                    shared.store.start_task(task_id).await;
                    info!(job_id, task_id, "foreground deadline elapsed, job promoted");
                    Ok(ExecuteOutcome::Backgrounded { task_id })
                } else {
                    Ok(ExecuteOutcome::Completed(finish(rx.await)))
                }
            }
        }
    }

    /// Number of live slots. Equals the configured worker count whenever the
    /// pool is running and not shutting down.
    pub async fn slot_count(&self) -> usize {
        self.shared.slots.lock().await.len()
    }

    pub async fn active_job_count(&self) -> usize {
        self.shared.active.lock().await.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }

    /// Stop accepting work, tear down every slot, and finalise in-flight
    /// and queued jobs as failed.
    pub async fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down worker pool");

        if let Some(handle) = self.health.lock().await.take() {
            handle.abort();
        }

        // Abort slots first: this drops in-flight runner futures (killing
        // their children) and releases the queue receiver lock an idle
        // worker may hold.
        {
            let mut slots = self.shared.slots.lock().await;
            for slot in slots.drain(..) {
                slot.handle.abort();
            }
        }

        // Reject everything still queued.
        {
            let mut rx = self.shared.queue_rx.lock().await;
            rx.close();
            while let Ok(job) = rx.try_recv() {
                self.shared.store.fail_task(job.task_id, SHUTDOWN_REASON).await;
                job.reply.lock().await.take();
            }
        }

        // Finalise in-flight jobs.
        {
            let mut active = self.shared.active.lock().await;
            for (_, job) in active.drain() {
                self.shared.store.fail_task(job.task_id, SHUTDOWN_REASON).await;
                job.reply.lock().await.take();
            }
        }

        if let Some(handle) = self.event_loop.lock().await.take() {
            handle.abort();
        }
        info!("worker pool shut down");
    }
}

/// Map a reply-channel outcome to a result. A dropped sender means the
/// worker was torn down before it could answer.
fn finish(res: Result<RunResult, oneshot::error::RecvError>) -> RunResult {
    res.unwrap_or_else(|_| RunResult::internal_failure("Worker terminated before completion"))
}

fn spawn_slot(shared: &Arc<PoolShared>) -> Slot {
    let id = shared.next_slot_id.fetch_add(1, Ordering::SeqCst);
    debug!(slot = id, "spawning worker slot");
    Slot {
        id,
        handle: tokio::spawn(worker_loop(shared.clone(), id)),
    }
}

/// Aborts the wrapped task when dropped, so tearing down a worker slot also
/// tears down the runner future (and with it the child process and scratch
/// directory).
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    async fn join(&mut self) -> Result<T, tokio::task::JoinError> {
        (&mut self.0).await
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// One slot: pull jobs off the shared queue and drive the runner.
async fn worker_loop(shared: Arc<PoolShared>, slot_id: usize) {
    debug!(slot = slot_id, "worker slot started");

    loop {
        let job = {
            let mut rx = shared.queue_rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else { break };

        if shared.shutting_down.load(Ordering::SeqCst) {
            shared.store.fail_task(job.task_id, SHUTDOWN_REASON).await;
            job.reply.lock().await.take();
            continue;
        }

        shared.store.start_task(job.task_id).await;
        {
            let mut active = shared.active.lock().await;
            active.insert(
                job.id,
                ActiveJob {
                    task_id: job.task_id,
                    slot: slot_id,
                    started: Instant::now(),
                    reply: job.reply.clone(),
                },
            );
        }

        // Live output flows through the typed event channel so the event
        // loop can drop chunks for jobs that are no longer active.
        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
        let sink = OutputSink::new(chunk_tx);
        let forward_tx = shared.event_tx.clone();
        let job_id = job.id;
        let forward = tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                if forward_tx
                    .send(WorkerEvent::LiveOutput { job_id, chunk })
                    .is_err()
                {
                    break;
                }
            }
        });

        let runner = shared.runner.clone();
        let request = job.request.clone();
        let mut run = AbortOnDrop(tokio::spawn(
            async move { runner.run(&request, &sink).await },
        ));

        let event = match run.join().await {
            Ok(result) => WorkerEvent::JobCompleted {
                job_id: job.id,
                result,
            },
            Err(e) => WorkerEvent::JobFailed {
                job_id: job.id,
                reason: format!("{WORKER_CRASH_REASON}: {e}"),
            },
        };

        let _ = forward.await;
        let _ = shared.event_tx.send(event);
    }

    debug!(slot = slot_id, "worker slot stopped");
}

/// Route worker events to the task store and any waiting caller. Events for
/// unknown job ids are dropped.
async fn event_loop(shared: Arc<PoolShared>, mut rx: mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            WorkerEvent::LiveOutput { job_id, chunk } => {
                let task_id = shared.active.lock().await.get(&job_id).map(|j| j.task_id);
                match task_id {
                    Some(task_id) => shared.store.append_output(task_id, chunk).await,
                    None => debug!(job_id, "live output for unknown job dropped"),
                }
            }

            WorkerEvent::JobCompleted { job_id, result } => {
                let Some(job) = shared.active.lock().await.remove(&job_id) else {
                    debug!(job_id, "completion for unknown job dropped");
                    continue;
                };

                if result.timed_out {
                    let reason = result
                        .error
                        .clone()
                        .unwrap_or_else(|| "Execution timed out".to_string());
                    shared.store.fail_task(job.task_id, &reason).await;
                } else {
                    shared.store.complete_task(job.task_id, result.clone()).await;
                }

                let tx = job.reply.lock().await.take();
                if let Some(tx) = tx {
                    let _ = tx.send(result);
                }
            }

            WorkerEvent::JobFailed { job_id, reason } => {
                let Some(job) = shared.active.lock().await.remove(&job_id) else {
                    debug!(job_id, "failure for unknown job dropped");
                    continue;
                };
                warn!(job_id, task_id = job.task_id, %reason, "job failed");
                shared.store.fail_task(job.task_id, &reason).await;
                // dropping the reply wakes a foreground caller with an error
                job.reply.lock().await.take();
            }
        }
    }
}

async fn health_loop(shared: Arc<PoolShared>) {
    let mut ticker = tokio::time::interval(shared.config.health_check_interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if shared.shutting_down.load(Ordering::SeqCst) {
            break;
        }
        health_check(&shared).await;
    }
}

/// Kill jobs running past the age limit and restore the slot count.
async fn health_check(shared: &Arc<PoolShared>) {
    let expired: Vec<(u64, ActiveJob)> = {
        let mut active = shared.active.lock().await;
        let ids: Vec<u64> = active
            .iter()
            .filter(|(_, job)| job.started.elapsed() > shared.config.max_job_age)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| active.remove(&id).map(|job| (id, job)))
            .collect()
    };

    for (job_id, job) in expired {
        warn!(
            job_id,
            task_id = job.task_id,
            slot = job.slot,
            "job exceeded max age, killing its worker slot"
        );
        shared.store.fail_task(job.task_id, HEALTH_KILL_REASON).await;
        job.reply.lock().await.take();

        let mut slots = shared.slots.lock().await;
        if let Some(pos) = slots.iter().position(|s| s.id == job.slot) {
            // aborting the slot drops the runner future, which kills the
            // child and removes its scratch directory
            slots.remove(pos).handle.abort();
        }
    }

    respawn_missing_slots(shared).await;
}

/// Replace slots that crashed or were culled so the total stays fixed.
async fn respawn_missing_slots(shared: &Arc<PoolShared>) {
    if shared.shutting_down.load(Ordering::SeqCst) {
        return;
    }

    let mut slots = shared.slots.lock().await;
    slots.retain(|slot| {
        if slot.handle.is_finished() {
            warn!(slot = slot.id, "worker slot exited unexpectedly");
            false
        } else {
            true
        }
    });
    while slots.len() < shared.config.worker_count {
        slots.push(spawn_slot(shared));
    }
}
