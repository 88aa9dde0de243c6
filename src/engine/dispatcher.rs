//! Dispatcher: process-wide supervisor for the worker pool and the periodic
//! sweeps.
//!
//! Dispatch is level-triggered: a tick that finds due work signals every
//! worker, and a missed signal is harmless because the next tick repeats the
//! check.

use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::worker::{Worker, WorkerSignal};
use super::EngineContext;

struct WorkerHandle {
    id: String,
    signals: mpsc::Sender<WorkerSignal>,
    task: JoinHandle<()>,
}

pub struct Dispatcher {
    ctx: EngineContext,
    workers: Vec<WorkerHandle>,
    timers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            workers: Vec::new(),
            timers: Vec::new(),
        }
    }

    /// Start N workers and the dispatch/cleanup timers. Worker construction
    /// is staggered to avoid a thundering herd on the store, and an initial
    /// dispatch runs immediately.
    pub async fn start(&mut self) {
        let settings = self.ctx.settings.clone();

        for n in 0..settings.worker_count {
            let id = format!("worker-{}", n);
            // Two slots: one drain and one stop can always be queued.
            let (tx, rx) = mpsc::channel(2);
            let worker = Worker::new(id.clone(), self.ctx.clone(), rx);
            let task = tokio::spawn(worker.run());
            self.workers.push(WorkerHandle {
                id,
                signals: tx,
                task,
            });
            tokio::time::sleep(settings.worker_start_stagger).await;
        }

        let dispatch_ctx = self.ctx.clone();
        let dispatch_senders: Vec<mpsc::Sender<WorkerSignal>> =
            self.workers.iter().map(|w| w.signals.clone()).collect();
        self.timers.push(tokio::spawn(async move {
            // The first tick fires immediately: that is the initial dispatch.
            let mut tick = tokio::time::interval(dispatch_ctx.settings.dispatch_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if dispatch_ctx.draining.load(Ordering::SeqCst) {
                    break;
                }
                match dispatch_ctx.store.queue().has_due_jobs() {
                    Ok(true) => {
                        debug!("dispatch tick: due jobs found, signaling workers");
                        for sender in &dispatch_senders {
                            // A full channel means a drain signal is already
                            // queued; the signal is idempotent.
                            let _ = sender.try_send(WorkerSignal::Drain);
                        }
                    }
                    Ok(false) => {}
                    Err(e) => warn!("dispatch tick failed: {}", e),
                }
            }
        }));

        let cleanup_ctx = self.ctx.clone();
        self.timers.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(cleanup_ctx.settings.cleanup_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if cleanup_ctx.draining.load(Ordering::SeqCst) {
                    break;
                }
                let queue = cleanup_ctx.store.queue();
                match queue
                    .cleanup_orphaned_jobs(cleanup_ctx.settings.orphan_threshold)
                    .await
                {
                    Ok(0) => {}
                    Ok(n) => info!(recovered = n, "orphan sweep finished"),
                    Err(e) => warn!("orphan sweep failed: {}", e),
                }
                match queue.archive_old_documents().await {
                    Ok(_) => {}
                    Err(e) => warn!("retention sweep failed: {}", e),
                }
            }
        }));

        info!(
            workers = self.workers.len(),
            dispatch_interval = ?settings.dispatch_interval,
            cleanup_interval = ?settings.cleanup_interval,
            "dispatcher started"
        );
    }

    /// Graceful drain: stop claiming, finish in-flight work, then force-kill
    /// stragglers after the per-worker grace period.
    pub async fn stop(mut self) {
        info!("dispatcher stopping");
        self.ctx.draining.store(true, Ordering::SeqCst);

        for timer in &self.timers {
            timer.abort();
        }

        for worker in &self.workers {
            let _ = worker.signals.try_send(WorkerSignal::Stop);
        }

        let grace = self.ctx.settings.graceful_shutdown_per_worker;
        for worker in &mut self.workers {
            match tokio::time::timeout(grace, &mut worker.task).await {
                Ok(_) => debug!(worker = %worker.id, "worker drained"),
                Err(_) => {
                    // The in-flight job row stays processing; the next
                    // orphan sweep recovers it.
                    warn!(worker = %worker.id, "worker did not drain in time, aborting");
                    worker.task.abort();
                }
            }
        }

        info!("dispatcher stopped");
    }
}
