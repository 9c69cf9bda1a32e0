//! Diagnostic Reporting
//!
//! Formats the human-readable event lines and hands them to a
//! [`DiagnosticSink`]. Reporting never feeds back into control flow.

use std::sync::{Arc, Mutex};
use tracing::Level;

/// Line-oriented debug output channel.
///
/// Implementations are called from interrupt context as well as from the
/// main loop, so `write_line` must not block indefinitely and must swallow
/// its own output failures.
pub trait DiagnosticSink: Send + Sync {
    fn write_line(&self, level: Level, line: &str);
}

/// Sink forwarding every line to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn write_line(&self, level: Level, line: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "obd::diag", "{}", line),
            Level::WARN => tracing::warn!(target: "obd::diag", "{}", line),
            Level::INFO => tracing::info!(target: "obd::diag", "{}", line),
            Level::DEBUG => tracing::debug!(target: "obd::diag", "{}", line),
            _ => tracing::trace!(target: "obd::diag", "{}", line),
        }
    }
}

/// Sink keeping lines in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Number of lines equal to `line`
    pub fn count(&self, line: &str) -> usize {
        self.lines().iter().filter(|l| l.as_str() == line).count()
    }

    pub fn is_empty(&self) -> bool {
        self.lines().is_empty()
    }

    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

impl DiagnosticSink for MemorySink {
    fn write_line(&self, _level: Level, line: &str) {
        // A poisoned sink drops the line
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

/// Formats protocol events onto a sink
#[derive(Clone)]
pub struct Reporter {
    sink: Arc<dyn DiagnosticSink>,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}

impl Reporter {
    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { sink }
    }

    pub fn request_sent(&self, pid: u8) {
        self.sink
            .write_line(Level::INFO, &format!("Sending request for PID {}", pid));
    }

    pub fn received(&self, first: u8, second: u8) {
        self.sink
            .write_line(Level::INFO, &format!("Received msg: {} {}", first, second));
    }

    pub fn data_loss(&self) {
        self.sink.write_line(Level::WARN, "CAN message loss detected");
    }

    pub fn unexpected_interrupt(&self) {
        self.sink.write_line(Level::WARN, "Unexpected CAN bus interrupt");
    }

    pub fn no_response(&self, pid: u8, attempt: u32) {
        self.sink.write_line(
            Level::WARN,
            &format!("No response for PID {} (attempt {})", pid, attempt),
        );
    }

    pub fn retries_exhausted(&self, pid: u8, attempts: u32) {
        self.sink.write_line(
            Level::ERROR,
            &format!("ECU silent for PID {} after {} attempts", pid, attempts),
        );
    }

    pub fn unexpected_response(&self, service: u8, pid: u8) {
        self.sink.write_line(
            Level::WARN,
            &format!("Unexpected response: service {:#04X} pid {:#04X}", service, pid),
        );
    }
}
