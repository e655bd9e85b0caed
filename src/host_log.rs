//! Per-host log buffer. Workers record lines while a host is processed and
//! emit them in one block when it completes, so concurrent hosts never
//! interleave in the output.

use std::sync::Mutex;

use tracing::{debug, error, info, trace, warn, Level};

static FLUSH_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug)]
pub struct HostLog {
    host: String,
    entries: Vec<(Level, String)>,
}

impl HostLog {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn push(&mut self, level: Level, message: impl Into<String>) {
        self.entries.push((level, message.into()));
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.push(Level::DEBUG, message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(Level::INFO, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(Level::WARN, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Level::ERROR, message);
    }

    pub fn entries(&self) -> &[(Level, String)] {
        &self.entries
    }

    /// Emit every buffered line under the process-wide flush lock.
    pub fn flush(self) {
        let _guard = FLUSH_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let host = self.host.as_str();
        for (level, message) in &self.entries {
            if *level == Level::ERROR {
                error!(host, "{message}");
            } else if *level == Level::WARN {
                warn!(host, "{message}");
            } else if *level == Level::INFO {
                info!(host, "{message}");
            } else if *level == Level::DEBUG {
                debug!(host, "{message}");
            } else {
                trace!(host, "{message}");
            }
        }
    }
}
