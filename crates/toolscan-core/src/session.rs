use std::sync::{Mutex, PoisonError};

use tracing::info;

use crate::collector::ReportCollector;
use crate::error::TrackerError;
use crate::model::ScanTask;
use crate::tracker::TaskTracker;

/// Shared state of one scan run: the task tracker and the report collector.
///
/// The tracker lock is only ever taken inside [`ScanSession::with_tracker`],
/// so it can never be held across an `.await`.
#[derive(Debug, Default)]
pub struct ScanSession {
    tracker: Mutex<TaskTracker>,
    collector: ReportCollector,
}

impl ScanSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the tracker.
    pub fn with_tracker<T>(&self, f: impl FnOnce(&mut TaskTracker) -> T) -> T {
        let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut tracker)
    }

    pub fn collector(&self) -> &ReportCollector {
        &self.collector
    }

    /// Start a new run: replace the task list and forget previously fetched reports.
    pub fn begin_run(&self, tasks: Vec<ScanTask>) -> Result<(), TrackerError> {
        let count = tasks.len();
        self.with_tracker(|tracker| tracker.initialize(tasks))?;
        self.collector.clear();
        info!(tasks = count, "scan run started");
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<ScanTask> {
        self.with_tracker(|tracker| tracker.snapshot())
    }
}
