//! Reporter trait for dependency injection
//!
//! This trait allows core logic to report progress and status without
//! being coupled to a specific CLI or GUI implementation.

use crate::types::{EnvVersion, Stage};

pub trait Reporter: Send + Sync {
    /// A pipeline stage has started for an environment.
    fn stage(&self, version: &EnvVersion, stage: Stage);

    /// Overall progress update, 0-100, monotonic within an operation.
    fn progress(&self, version: &EnvVersion, percent: u8);

    /// A repository named `name` is being synchronized.
    fn sync_update(&self, version: &EnvVersion, name: &str);

    /// Marks an operation as successfully completed.
    fn done(&self, version: &EnvVersion, detail: &str);

    /// Marks an operation as failed with a specific reason.
    fn failed(&self, version: &EnvVersion, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);
}

/// Reporter that forwards everything to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn stage(&self, version: &EnvVersion, stage: Stage) {
        tracing::info!("[{}] {:?}", version.as_str(), stage);
    }

    fn progress(&self, version: &EnvVersion, percent: u8) {
        tracing::debug!("[{}] {percent}%", version.as_str());
    }

    fn sync_update(&self, version: &EnvVersion, name: &str) {
        tracing::info!("[{}] updating {name}", version.as_str());
    }

    fn done(&self, version: &EnvVersion, detail: &str) {
        tracing::info!("[{}] {detail}", version.as_str());
    }

    fn failed(&self, version: &EnvVersion, reason: &str) {
        tracing::error!("[{}] {reason}", version.as_str());
    }

    fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    fn warning(&self, msg: &str) {
        tracing::warn!("{msg}");
    }
}

/// Reporter that discards everything. Useful in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn stage(&self, _version: &EnvVersion, _stage: Stage) {}
    fn progress(&self, _version: &EnvVersion, _percent: u8) {}
    fn sync_update(&self, _version: &EnvVersion, _name: &str) {}
    fn done(&self, _version: &EnvVersion, _detail: &str) {}
    fn failed(&self, _version: &EnvVersion, _reason: &str) {}
    fn info(&self, _msg: &str) {}
    fn warning(&self, _msg: &str) {}
}
