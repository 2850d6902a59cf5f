//! Retry scheduler: owns the task queue and the background worker(s).
//!
//! Callers `submit` failed messages from any thread. Each worker blocks on
//! the queue, defers tasks that are not due yet and executes the rest. A
//! failing task re-inserts itself through the queue's [`TaskSink`] impl, so
//! the loop never needs to know the retry policy.
//!
//! Shutdown pushes one sentinel per worker: `take` blocks on an empty queue,
//! and the sentinel is what wakes it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::error::Result;
use crate::message::{Message, MessageHandler};
use crate::queue::TaskQueue;
use crate::retry::{now_millis, over_threshold, RetryPolicy};
use crate::task::{panic_message, RetryTask, TaskOutcome};

/// Snapshot of scheduler counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Messages accepted by `submit`.
    pub submitted: u64,
    /// Messages refused because the scheduler was closed.
    pub rejected: u64,
    pub succeeded: u64,
    /// Failed attempts that were put back in the queue.
    pub retried: u64,
    /// Messages abandoned at the retry ceiling.
    pub dropped: u64,
    /// Failures caught in the worker loop outside a task's own retry handling.
    pub worker_errors: u64,
    /// Submits that pushed the queue over the soft size threshold.
    pub queue_warnings: u64,
    pub pending: usize,
}

// Relaxed atomics; approximate counters are fine
#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    worker_errors: AtomicU64,
    queue_warnings: AtomicU64,
}

struct Shared<M> {
    queue: TaskQueue<M>,
    config: RetryConfig,
    policy: RetryPolicy,
    counters: Counters,
    live_workers: Mutex<usize>,
    workers_exited: Condvar,
}

impl<M: Message> Shared<M> {
    fn run_worker(&self) {
        loop {
            let task = self.queue.take();
            if task.is_sentinel() {
                break;
            }
            // Keep draining until this worker's own sentinel arrives
            if self.queue.is_closed() {
                debug!(message_id = task.message_id(), "scheduler closed, abandoning task");
                continue;
            }

            let now = now_millis();
            if !task.is_due(now) {
                let wait = Duration::from_millis(task.remaining_ms(now)).min(self.config.poll_interval());
                self.queue.defer(task, wait);
                continue;
            }

            match panic::catch_unwind(AssertUnwindSafe(|| task.execute(&self.queue))) {
                Ok(outcome) => self.record(outcome),
                Err(payload) => {
                    self.counters.worker_errors.fetch_add(1, Ordering::Relaxed);
                    error!(
                        error = panic_message(&*payload),
                        "retry worker failed while processing task"
                    );
                }
            }
        }

        let mut live = self.live_workers.lock();
        *live = live.saturating_sub(1);
        self.workers_exited.notify_all();
    }

    fn record(&self, outcome: TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Completed => &self.counters.succeeded,
            TaskOutcome::Rescheduled { .. } => &self.counters.retried,
            TaskOutcome::Dropped { .. } => &self.counters.dropped,
            TaskOutcome::Shutdown => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Delayed-retry scheduler for messages whose first processing attempt failed.
///
/// Thread-safe: all methods take `&self`.
pub struct RetryScheduler<M: Message> {
    shared: Arc<Shared<M>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<M: Message> RetryScheduler<M> {
    /// Validate `config` and spawn `worker_count` named worker threads.
    pub fn start(config: RetryConfig) -> Result<Self> {
        config.validate()?;
        let worker_count = config.worker_count;
        let prefix = config.thread_name_prefix.clone();

        let scheduler = Self {
            shared: Arc::new(Shared {
                queue: TaskQueue::new(),
                policy: RetryPolicy::from(&config),
                config,
                counters: Counters::default(),
                live_workers: Mutex::new(0),
                workers_exited: Condvar::new(),
            }),
            workers: Mutex::new(Vec::with_capacity(worker_count)),
        };

        for index in 0..worker_count {
            let shared = Arc::clone(&scheduler.shared);
            *scheduler.shared.live_workers.lock() += 1;
            let spawned = thread::Builder::new()
                .name(format!("{prefix}-{index}"))
                .spawn(move || shared.run_worker());
            match spawned {
                Ok(handle) => scheduler.workers.lock().push(handle),
                Err(e) => {
                    *scheduler.shared.live_workers.lock() -= 1;
                    // Dropping `scheduler` closes the workers already running.
                    return Err(e.into());
                }
            }
        }

        info!(workers = worker_count, "retry scheduler started");
        Ok(scheduler)
    }

    pub fn with_defaults() -> Result<Self> {
        Self::start(RetryConfig::default())
    }

    /// Queue a failed message for a delayed retry.
    ///
    /// Never blocks beyond the queue insert. Above the soft threshold a warning
    /// is logged but the task is still accepted. Returns `false` (and drops the
    /// message) once the scheduler is closed.
    pub fn submit(&self, message: M, handler: Arc<dyn MessageHandler<M>>) -> bool {
        let shared = &self.shared;
        let task = RetryTask::new(message, handler, shared.policy);
        let pending = match shared.queue.push_if_open(task) {
            Ok(pending) => pending,
            Err(task) => {
                shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    message_id = task.message_id(),
                    "retry scheduler closed, dropping message"
                );
                return false;
            }
        };
        shared.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let threshold = shared.config.queue_warn_threshold;
        if over_threshold(pending, threshold) {
            shared.counters.queue_warnings.fetch_add(1, Ordering::Relaxed);
            warn!(pending, threshold, "retry queue task count over threshold");
        }
        true
    }

    /// Stop the workers. Pending tasks are abandoned, not drained.
    ///
    /// An execution already in flight is allowed to finish; a worker that is
    /// still busy after the shutdown grace is detached rather than joined.
    /// Calling `close` more than once is a no-op.
    pub fn close(&self) {
        let shared = &self.shared;
        // Flag and clear happen under the queue lock, so a racing submit is
        // either rejected or cleared here, never stranded.
        let Some(abandoned) = shared.queue.close() else {
            return;
        };
        let mut workers = self.workers.lock();
        for _ in 0..workers.len() {
            shared.queue.push(RetryTask::sentinel());
        }

        let all_exited = {
            let mut live = shared.live_workers.lock();
            let result = shared.workers_exited.wait_while_for(
                &mut live,
                |live| *live > 0,
                shared.config.shutdown_grace(),
            );
            if result.timed_out() {
                warn!(
                    still_running = *live,
                    "retry workers did not exit within shutdown grace, detaching"
                );
            }
            !result.timed_out()
        };

        for handle in workers.drain(..) {
            // Still busy: dropping the handle detaches it.
            if !all_exited && !handle.is_finished() {
                continue;
            }
            if handle.join().is_err() {
                error!("retry worker thread panicked");
            }
        }

        info!(abandoned, "retry scheduler closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.queue.is_closed()
    }

    /// Number of tasks currently waiting in the queue.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn config(&self) -> &RetryConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.shared.counters;
        SchedulerStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            worker_errors: c.worker_errors.load(Ordering::Relaxed),
            queue_warnings: c.queue_warnings.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }
}

impl<M: Message> Drop for RetryScheduler<M> {
    fn drop(&mut self) {
        self.close();
    }
}
