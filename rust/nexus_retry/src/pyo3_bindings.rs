//! PyO3 bindings for the retry scheduler.
//!
//! Handlers are Python callables `(msg_id: str, payload: bytes)`; raising
//! counts as a failed attempt. Worker threads take the GIL only while the
//! callable runs.

use std::sync::Arc;

use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::config::RetryConfig;
use crate::error::{HandlerError, RetryError};
use crate::message::{DefaultMessage, MessageHandler};
use crate::scheduler::RetryScheduler;

/// Convert RetryError to Python RuntimeError.
fn to_py_err(e: RetryError) -> PyErr {
    PyRuntimeError::new_err(format!("{e}"))
}

struct PyHandler {
    callable: Py<PyAny>,
}

impl MessageHandler<DefaultMessage> for PyHandler {
    fn process(&self, message: &DefaultMessage) -> Result<(), HandlerError> {
        Python::attach(|py| {
            self.callable
                .call1(py, (message.msg_id.as_str(), message.payload.as_slice()))
                .map(|_| ())
                .map_err(|e| HandlerError::from(e.to_string()))
        })
    }
}

/// Rust-backed retry scheduler exposed to Python.
///
/// Thread-safe: all methods take `&self`. Call `close()` explicitly; relying
/// on garbage collection makes the shutdown wait run while the GIL is held.
#[pyclass(frozen, name = "RetryScheduler")]
pub struct PyRetryScheduler {
    inner: RetryScheduler<DefaultMessage>,
}

#[pymethods]
impl PyRetryScheduler {
    /// Start a scheduler with its worker thread(s).
    ///
    /// Args:
    ///     retry_period_ms: Base retry delay unit in milliseconds.
    ///     poll_interval_ms: Upper bound on the not-yet-due re-check wait.
    ///     max_retries: Retry ceiling before a message is dropped.
    ///     worker_count: Number of worker threads sharing the queue.
    #[new]
    #[pyo3(signature = (retry_period_ms = 15000, poll_interval_ms = 1000, max_retries = 3, worker_count = 1))]
    fn new(
        retry_period_ms: u64,
        poll_interval_ms: u64,
        max_retries: u32,
        worker_count: usize,
    ) -> PyResult<Self> {
        let config = RetryConfig {
            retry_period_unit_ms: retry_period_ms,
            poll_interval_ms,
            max_retries,
            worker_count,
            ..RetryConfig::default()
        };
        let inner = RetryScheduler::start(config).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Queue a failed message for retry. Raises if the scheduler is closed.
    #[pyo3(signature = (msg_id, payload, handler, topic = ""))]
    fn submit(&self, msg_id: &str, payload: &[u8], handler: Py<PyAny>, topic: &str) -> PyResult<()> {
        let message = DefaultMessage::new(msg_id, payload.to_vec()).with_topic(topic, 0, 0);
        let handler = Arc::new(PyHandler { callable: handler });
        if self.inner.submit(message, handler) {
            Ok(())
        } else {
            Err(to_py_err(RetryError::Closed))
        }
    }

    /// Stop the worker(s). Releases the GIL while waiting for them to exit.
    fn close(&self, py: Python<'_>) {
        py.detach(|| self.inner.close());
    }

    /// Number of tasks waiting in the queue.
    fn pending(&self) -> usize {
        self.inner.pending()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Counter snapshot as a dict.
    fn stats<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let s = self.inner.stats();
        let dict = PyDict::new(py);
        dict.set_item("submitted", s.submitted)?;
        dict.set_item("rejected", s.rejected)?;
        dict.set_item("succeeded", s.succeeded)?;
        dict.set_item("retried", s.retried)?;
        dict.set_item("dropped", s.dropped)?;
        dict.set_item("worker_errors", s.worker_errors)?;
        dict.set_item("queue_warnings", s.queue_warnings)?;
        dict.set_item("pending", s.pending)?;
        Ok(dict)
    }
}
