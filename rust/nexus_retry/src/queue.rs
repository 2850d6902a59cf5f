use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::message::Message;
use crate::task::{RetryTask, TaskSink};

struct QueueState<M> {
    heap: BinaryHeap<Reverse<RetryTask<M>>>,
    closed: bool,
}

/// Thread-safe min-heap of tasks keyed by fire time, with a blocking `take`.
///
/// Any number of producers may `push`; consumers block on a `Condvar` while
/// the heap is empty and are woken by every push. The closed flag lives under
/// the same lock as the heap, so `push_if_open` and `close` cannot interleave.
pub struct TaskQueue<M> {
    state: Mutex<QueueState<M>>,
    available: Condvar,
    next_seq: AtomicU64,
}

impl<M> Default for TaskQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> TaskQueue<M> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                closed: false,
            }),
            available: Condvar::new(),
            next_seq: AtomicU64::new(1),
        }
    }

    fn stamp(&self, task: &mut RetryTask<M>) {
        task.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
    }

    /// Insert a task and wake one waiting consumer. Returns the new queue length.
    ///
    /// Ignores the closed flag; shutdown sentinels go through here.
    pub fn push(&self, mut task: RetryTask<M>) -> usize {
        self.stamp(&mut task);
        let len = {
            let mut state = self.state.lock();
            state.heap.push(Reverse(task));
            state.heap.len()
        };
        self.available.notify_one();
        len
    }

    /// Insert a task unless the queue is closed.
    ///
    /// Returns the new length, or hands the task back if the queue was closed.
    pub fn push_if_open(&self, mut task: RetryTask<M>) -> Result<usize, RetryTask<M>> {
        let len = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(task);
            }
            self.stamp(&mut task);
            state.heap.push(Reverse(task));
            state.heap.len()
        };
        self.available.notify_one();
        Ok(len)
    }

    /// Remove the earliest task, blocking while the queue is empty.
    pub fn take(&self) -> RetryTask<M> {
        let mut state = self.state.lock();
        loop {
            if let Some(Reverse(task)) = state.heap.pop() {
                return task;
            }
            self.available.wait(&mut state);
        }
    }

    pub fn try_take(&self) -> Option<RetryTask<M>> {
        self.state.lock().heap.pop().map(|Reverse(task)| task)
    }

    /// Put a not-yet-due task back and wait up to `timeout` for the queue to change.
    ///
    /// Insert and wait happen under one lock, so a push that lands in between
    /// still wakes the caller. On a closed queue the task is dropped and the
    /// call returns at once.
    pub fn defer(&self, mut task: RetryTask<M>, timeout: Duration) {
        self.stamp(&mut task);
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.heap.push(Reverse(task));
        self.available.wait_for(&mut state, timeout);
    }

    /// Fire time of the earliest task, if any.
    pub fn peek_fire_time(&self) -> Option<u64> {
        self.state.lock().heap.peek().map(|Reverse(task)| task.next_fire_time())
    }

    /// Mark the queue closed and drop every queued task, atomically.
    ///
    /// Returns how many tasks were discarded, or `None` if it was already closed.
    pub fn close(&self) -> Option<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.closed = true;
        let n = state.heap.len();
        state.heap.clear();
        Some(n)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Drop every queued task. Returns how many were discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let n = state.heap.len();
        state.heap.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }
}

impl<M: Message> TaskSink<M> for TaskQueue<M> {
    fn enqueue(&self, task: RetryTask<M>) {
        if let Err(task) = self.push_if_open(task) {
            debug!(message_id = task.message_id(), "queue closed, retry not re-queued");
        }
    }
}
