//! Error-reporting collaborator.

use serde_json::Value;
use tracing::error;

/// One failure worth forwarding to error telemetry.
#[derive(Clone, Debug)]
pub struct ErrorReport {
    pub source: &'static str,
    pub message: String,
    pub entity_name: &'static str,
    pub message_type: Option<String>,
    pub payload: Value,
    pub error: String,
}

pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: &ErrorReport);
}

/// Reporter that only logs. Used when the host does not wire telemetry.
#[derive(Debug, Default)]
pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report(&self, report: &ErrorReport) {
        error!(
            source = report.source,
            entity = report.entity_name,
            message_type = report.message_type.as_deref().unwrap_or(""),
            payload = %report.payload,
            error = %report.error,
            "{}",
            report.message
        );
    }
}
