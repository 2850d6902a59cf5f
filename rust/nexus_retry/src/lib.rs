pub mod config;
pub mod error;
pub mod message;
#[cfg(feature = "python")]
pub mod pyo3_bindings;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod task;

pub use config::RetryConfig;
pub use error::{HandlerError, RetryError};
pub use message::{DefaultMessage, Message, MessageHandler};
pub use scheduler::{RetryScheduler, SchedulerStats};
pub use task::{RetryTask, TaskOutcome, TaskSink};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Python module: _nexus_retry
#[cfg(feature = "python")]
#[pymodule]
fn _nexus_retry(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<pyo3_bindings::PyRetryScheduler>()?;
    Ok(())
}
