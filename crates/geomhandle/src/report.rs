//! Host error-report channel for failures raised inside user hooks
//!
//! Hooks run on behalf of native callbacks. Nothing they do may unwind back
//! into the engine, so every hook call goes through [`guard`], which turns
//! both `Err` results and panics into a report.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

/// Receives errors that could not be propagated to a caller.
pub trait ErrorReporter {
    /// Report a failure raised while running `origin`.
    fn report(&self, origin: &str, error: &anyhow::Error);
}

/// Default reporter: logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, origin: &str, err: &anyhow::Error) {
        error!(origin = origin, error = %err, "user data hook failed");
    }
}

/// Reporter that keeps every report in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: RefCell<Vec<String>>,
}

impl CollectingReporter {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// All reports so far, formatted as `origin: message`.
    pub fn reports(&self) -> Vec<String> {
        self.reports.borrow().clone()
    }

    /// Number of reports so far.
    pub fn len(&self) -> usize {
        self.reports.borrow().len()
    }

    /// Whether nothing has been reported.
    pub fn is_empty(&self) -> bool {
        self.reports.borrow().is_empty()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, origin: &str, err: &anyhow::Error) {
        self.reports.borrow_mut().push(format!("{origin}: {err}"));
    }
}

/// Run a hook, routing errors and panics to `reporter`.
///
/// Returns `None` when the hook failed in either way.
pub(crate) fn guard<T>(
    reporter: &dyn ErrorReporter,
    origin: &str,
    hook: impl FnOnce() -> anyhow::Result<T>,
) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            reporter.report(origin, &err);
            None
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            reporter.report(origin, &anyhow::anyhow!("panic: {message}"));
            None
        }
    }
}
