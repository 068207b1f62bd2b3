//! Audit progress reporting
//!
//! The SID map builder and the scan report progress through an injected
//! [`AuditObserver`] instead of writing to a global sink. The binary uses
//! [`ConsoleObserver`]; tests record messages to assert on them.

use std::sync::Mutex;
use tracing::{info, warn};

use crate::report::ObjectFindings;

pub trait AuditObserver: Send + Sync {
    fn on_info(&self, msg: &str);
    fn on_warning(&self, msg: &str);

    /// Called once per object with findings, as soon as it is audited.
    fn on_object(&self, _object: &ObjectFindings) {}
}

/// Forwards observer events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl AuditObserver for TracingObserver {
    fn on_info(&self, msg: &str) {
        info!("{}", msg);
    }

    fn on_warning(&self, msg: &str) {
        warn!("{}", msg);
    }
}

/// Logs through `tracing` and prints each affected object to stdout.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleObserver {
    pub quiet: bool,
}

impl AuditObserver for ConsoleObserver {
    fn on_info(&self, msg: &str) {
        info!("{}", msg);
    }

    fn on_warning(&self, msg: &str) {
        warn!("{}", msg);
    }

    fn on_object(&self, object: &ObjectFindings) {
        if !self.quiet {
            println!("{}", object.render());
        }
    }
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    infos: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
    objects: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Distinguished names passed to `on_object`, in call order.
    pub fn objects(&self) -> Vec<String> {
        self.objects.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl AuditObserver for RecordingObserver {
    fn on_info(&self, msg: &str) {
        if let Ok(mut infos) = self.infos.lock() {
            infos.push(msg.to_string());
        }
    }

    fn on_warning(&self, msg: &str) {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(msg.to_string());
        }
    }

    fn on_object(&self, object: &ObjectFindings) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.push(object.distinguished_name.clone());
        }
    }
}
