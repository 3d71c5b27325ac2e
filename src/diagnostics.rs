use core::time::Duration;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error};

/// Summary of a successful bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Name of the container from its config
    pub container: &'static str,
    pub total_nodes: usize,
    /// Nodes nothing else in the container depends on
    pub unused_nodes: usize,
    /// Injections a factory requested more than once in a single run
    pub repeated_injections: usize,
    pub duration: Duration,
}

/// Receiver of bootstrap reports.
///
/// Errors and panics of the sink are logged and never change the bootstrap outcome.
pub trait DiagnosticsSink: Send + Sync {
    /// # Errors
    /// Any error is logged and otherwise ignored
    fn report(&self, report: &BootstrapReport) -> anyhow::Result<()>;
}

pub(crate) fn deliver(sink: &dyn DiagnosticsSink, report: &BootstrapReport) {
    match catch_unwind(AssertUnwindSafe(|| sink.report(report))) {
        Ok(Ok(())) => debug!("Diagnostics reported"),
        Ok(Err(err)) => error!(%err, "Diagnostics sink failed"),
        Err(_) => error!("Diagnostics sink panicked"),
    }
}
