use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::HandlerError;
use crate::message::{Message, MessageHandler};
use crate::retry::{next_fire_time, now_millis, should_drop, RetryPolicy};

/// Narrow "put me back in the queue" capability handed to a failing task.
pub trait TaskSink<M>: Send + Sync {
    fn enqueue(&self, task: RetryTask<M>);
}

/// What happened to a task after one call to [`RetryTask::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Handler succeeded; the task is gone.
    Completed,
    /// Handler failed; the task re-entered the queue.
    Rescheduled { retry_count: u32, next_fire_time: u64 },
    /// Handler failed and the retry ceiling was reached; the message is dropped.
    Dropped { retry_count: u32 },
    /// The task was the shutdown sentinel.
    Shutdown,
}

struct TaskBody<M> {
    message: M,
    handler: Arc<dyn MessageHandler<M>>,
}

/// A failed message waiting for its next attempt.
///
/// Ordered by `next_fire_time` ascending; equal fire times fall back to
/// queue insertion order. A task without a body is the shutdown sentinel.
pub struct RetryTask<M> {
    body: Option<TaskBody<M>>,
    policy: RetryPolicy,
    retry_count: u32,
    next_fire_time: u64,
    pub(crate) seq: u64,
}

impl<M: Message> RetryTask<M> {
    /// First retry fires one period unit from now.
    pub fn new(message: M, handler: Arc<dyn MessageHandler<M>>, policy: RetryPolicy) -> Self {
        let fire_at = now_millis().saturating_add(policy.unit_ms);
        Self::with_fire_time(message, handler, policy, fire_at)
    }

    pub fn with_fire_time(
        message: M,
        handler: Arc<dyn MessageHandler<M>>,
        policy: RetryPolicy,
        next_fire_time: u64,
    ) -> Self {
        Self {
            body: Some(TaskBody { message, handler }),
            policy,
            retry_count: 0,
            next_fire_time,
            seq: 0,
        }
    }

    /// Run the handler once.
    ///
    /// On failure the retry count goes up and the task either re-enters `sink`
    /// with a later fire time or is dropped at the ceiling. Handler panics
    /// count as failures.
    pub fn execute(mut self, sink: &dyn TaskSink<M>) -> TaskOutcome {
        let result = match self.body.as_ref() {
            None => return TaskOutcome::Shutdown,
            Some(body) => {
                debug!(message_id = body.message.message_id(), "begin re-process message");
                invoke(body)
            }
        };

        match result {
            Ok(()) => TaskOutcome::Completed,
            Err(e) => {
                self.retry_count += 1;
                warn!(
                    retry_count = self.retry_count,
                    message_id = self.message_id(),
                    error = %e,
                    "retry message error"
                );
                self.retry(sink)
            }
        }
    }

    fn retry(mut self, sink: &dyn TaskSink<M>) -> TaskOutcome {
        let retry_count = self.retry_count;
        if should_drop(retry_count, self.policy.max_retries) {
            warn!(
                message_id = self.message_id(),
                retry_count, "retry_skip: retry ceiling reached, message dropped"
            );
            return TaskOutcome::Dropped { retry_count };
        }

        self.next_fire_time = next_fire_time(self.next_fire_time, retry_count, self.policy.unit_ms);
        let fire_at = self.next_fire_time;
        debug!(
            message_id = self.message_id(),
            next_fire_time = fire_at,
            "re-submit task to queue"
        );
        sink.enqueue(self);
        TaskOutcome::Rescheduled {
            retry_count,
            next_fire_time: fire_at,
        }
    }

    pub fn message_id(&self) -> &str {
        self.body
            .as_ref()
            .map(|b| b.message.message_id())
            .unwrap_or("<sentinel>")
    }
}

impl<M> RetryTask<M> {
    /// Empty task used only to wake and stop a worker. Sorts ahead of every live task.
    pub fn sentinel() -> Self {
        Self {
            body: None,
            policy: RetryPolicy::default(),
            retry_count: 0,
            next_fire_time: 0,
            seq: 0,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.body.is_none()
    }

    pub fn message(&self) -> Option<&M> {
        self.body.as_ref().map(|b| &b.message)
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn next_fire_time(&self) -> u64 {
        self.next_fire_time
    }

    /// Milliseconds until the task becomes due (0 if already due).
    pub fn remaining_ms(&self, now: u64) -> u64 {
        self.next_fire_time.saturating_sub(now)
    }

    pub fn is_due(&self, now: u64) -> bool {
        self.next_fire_time <= now
    }
}

fn invoke<M>(body: &TaskBody<M>) -> Result<(), HandlerError> {
    match panic::catch_unwind(AssertUnwindSafe(|| body.handler.process(&body.message))) {
        Ok(result) => result,
        Err(payload) => Err(format!("handler panicked: {}", panic_message(&*payload)).into()),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

impl<M> PartialEq for RetryTask<M> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<M> Eq for RetryTask<M> {}

impl<M> PartialOrd for RetryTask<M> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<M> Ord for RetryTask<M> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.next_fire_time
            .cmp(&other.next_fire_time)
            .then(self.seq.cmp(&other.seq))
    }
}

impl<M: Message> fmt::Debug for RetryTask<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTask")
            .field("message_id", &self.message_id())
            .field("retry_count", &self.retry_count)
            .field("next_fire_time", &self.next_fire_time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DefaultMessage;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    /// Collects re-enqueued tasks instead of feeding a worker.
    #[derive(Default)]
    struct VecSink(Mutex<Vec<RetryTask<DefaultMessage>>>);

    impl TaskSink<DefaultMessage> for VecSink {
        fn enqueue(&self, task: RetryTask<DefaultMessage>) {
            self.0.lock().push(task);
        }
    }

    impl VecSink {
        fn take(&self) -> Option<RetryTask<DefaultMessage>> {
            self.0.lock().pop()
        }
    }

    const POLICY: RetryPolicy = RetryPolicy {
        unit_ms: 100,
        max_retries: 3,
    };

    fn msg(id: &str) -> DefaultMessage {
        DefaultMessage::new(id, b"payload".to_vec())
    }

    fn always_fail() -> Arc<dyn MessageHandler<DefaultMessage>> {
        Arc::new(|_: &DefaultMessage| -> Result<(), HandlerError> { Err("boom".into()) })
    }

    #[test]
    fn test_new_fires_one_unit_later() {
        let before = now_millis();
        let task = RetryTask::new(msg("m"), always_fail(), POLICY);
        let after = now_millis();
        assert_eq!(task.retry_count(), 0);
        assert!(task.next_fire_time() >= before + 100);
        assert!(task.next_fire_time() <= after + 100);
        assert!(!task.is_sentinel());
    }

    #[test]
    fn test_success_completes() {
        let sink = VecSink::default();
        let handler: Arc<dyn MessageHandler<DefaultMessage>> =
            Arc::new(|_: &DefaultMessage| -> Result<(), HandlerError> { Ok(()) });
        let task = RetryTask::with_fire_time(msg("ok"), handler, POLICY, 1_000);
        assert_eq!(task.execute(&sink), TaskOutcome::Completed);
        assert!(sink.take().is_none());
    }

    #[test]
    fn test_failure_backoff_then_drop() {
        let sink = VecSink::default();
        let mut task = RetryTask::with_fire_time(msg("bad"), always_fail(), POLICY, 1_000);

        let mut expected_fire = 1_000;
        for k in 1..=2u32 {
            let outcome = task.execute(&sink);
            expected_fire += k as u64 * POLICY.unit_ms;
            assert_eq!(
                outcome,
                TaskOutcome::Rescheduled {
                    retry_count: k,
                    next_fire_time: expected_fire
                }
            );
            task = sink.take().expect("task re-enqueued");
            assert_eq!(task.retry_count(), k);
            assert_eq!(task.next_fire_time(), expected_fire);
        }

        // Third failure hits the ceiling
        assert_eq!(task.execute(&sink), TaskOutcome::Dropped { retry_count: 3 });
        assert!(sink.take().is_none());
    }

    #[test]
    fn test_panicking_handler_is_a_failure() {
        let sink = VecSink::default();
        let handler: Arc<dyn MessageHandler<DefaultMessage>> =
            Arc::new(|_: &DefaultMessage| -> Result<(), HandlerError> { panic!("handler bug") });
        let task = RetryTask::with_fire_time(msg("p"), handler, POLICY, 1_000);
        assert_eq!(
            task.execute(&sink),
            TaskOutcome::Rescheduled {
                retry_count: 1,
                next_fire_time: 1_100
            }
        );
        assert_eq!(sink.take().unwrap().message_id(), "p");
    }

    #[test]
    fn test_succeeds_on_second_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let handler: Arc<dyn MessageHandler<DefaultMessage>> =
            Arc::new(move |_: &DefaultMessage| -> Result<(), HandlerError> {
                if c.fetch_add(1, AtomicOrdering::SeqCst) == 0 {
                    Err("first attempt fails".into())
                } else {
                    Ok(())
                }
            });
        let sink = VecSink::default();
        let task = RetryTask::with_fire_time(msg("flaky"), handler, POLICY, 1_000);
        assert!(matches!(task.execute(&sink), TaskOutcome::Rescheduled { .. }));
        let task = sink.take().unwrap();
        assert_eq!(task.execute(&sink), TaskOutcome::Completed);
        assert!(sink.take().is_none());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn test_zero_max_retries_drops_immediately() {
        let sink = VecSink::default();
        let policy = RetryPolicy {
            unit_ms: 100,
            max_retries: 0,
        };
        let task = RetryTask::with_fire_time(msg("x"), always_fail(), policy, 1_000);
        assert_eq!(task.execute(&sink), TaskOutcome::Dropped { retry_count: 1 });
    }

    #[test]
    fn test_sentinel() {
        let sink = VecSink::default();
        let sentinel = RetryTask::<DefaultMessage>::sentinel();
        assert!(sentinel.is_sentinel());
        assert!(sentinel.message().is_none());
        assert_eq!(sentinel.message_id(), "<sentinel>");
        assert_eq!(sentinel.execute(&sink), TaskOutcome::Shutdown);
        assert!(sink.take().is_none());
    }

    #[test]
    fn test_ordering_by_fire_time_then_seq() {
        let early = RetryTask::with_fire_time(msg("a"), always_fail(), POLICY, 100);
        let late = RetryTask::with_fire_time(msg("b"), always_fail(), POLICY, 200);
        assert!(early < late);

        let mut first = RetryTask::with_fire_time(msg("c"), always_fail(), POLICY, 100);
        let mut second = RetryTask::with_fire_time(msg("d"), always_fail(), POLICY, 100);
        first.seq = 1;
        second.seq = 2;
        assert!(first < second);

        // Sentinel sorts ahead of live tasks
        assert!(RetryTask::sentinel() < early);
    }

    #[test]
    fn test_due_check() {
        let task = RetryTask::with_fire_time(msg("t"), always_fail(), POLICY, 1_000);
        assert!(!task.is_due(999));
        assert!(task.is_due(1_000));
        assert_eq!(task.remaining_ms(900), 100);
        assert_eq!(task.remaining_ms(2_000), 0);
    }
}
