use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ScanError, TrackerError};
use crate::model::{ReportId, ScanTask, TaskStatus, ToolId};

/// Reason shown for a failed task when the backend gave none.
pub const UNSPECIFIED_FAILURE: &str = "analysis failed";

/// Result of applying a status observation to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Applied,
    Unchanged,
    Rejected(Rejection),
}

/// Why an observation was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    UnknownTask,
    /// The task already reached a terminal state.
    Terminal(TaskStatus),
    /// The task already resolved to a different report.
    ReportConflict(ReportId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskCounts {
    pub fn tally(tasks: &[ScanTask]) -> Self {
        tasks.iter().fold(Self::default(), |mut counts, task| {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
            counts
        })
    }
}

/// Authoritative in-memory set of scan tasks for the current run.
///
/// Status only moves forward (`pending → completed | failed`) and a resolved
/// report id is write-once, so late or duplicated poll replies cannot undo
/// progress or trigger a second report fetch.
#[derive(Debug, Default)]
pub struct TaskTracker {
    tasks: Vec<ScanTask>,
    index: HashMap<ToolId, usize>,
    poll_attached: bool,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tracked tasks with a new run's list.
    pub fn initialize(&mut self, tasks: Vec<ScanTask>) -> Result<(), TrackerError> {
        if self.poll_attached {
            return Err(TrackerError::PollActive);
        }
        let mut index = HashMap::with_capacity(tasks.len());
        for (position, task) in tasks.iter().enumerate() {
            if index.insert(task.tool_id, position).is_some() {
                return Err(TrackerError::DuplicateTask(task.tool_id));
            }
        }
        debug!(tasks = tasks.len(), "task tracker initialized");
        self.tasks = tasks;
        self.index = index;
        Ok(())
    }

    pub(crate) fn attach_poll(&mut self) -> Result<(), TrackerError> {
        if self.poll_attached {
            return Err(TrackerError::PollActive);
        }
        self.poll_attached = true;
        Ok(())
    }

    pub(crate) fn detach_poll(&mut self) {
        self.poll_attached = false;
    }

    pub fn is_polling(&self) -> bool {
        self.poll_attached
    }

    /// Apply a forward-only transition, optionally resolving the report id.
    pub fn advance(
        &mut self,
        tool_id: ToolId,
        status: TaskStatus,
        report_id: Option<ReportId>,
    ) -> Advance {
        let Some(&position) = self.index.get(&tool_id) else {
            warn!(%tool_id, "status update for unknown task ignored");
            return Advance::Rejected(Rejection::UnknownTask);
        };
        let task = &mut self.tasks[position];

        if let (Some(current), Some(incoming)) = (task.report_id, report_id) {
            if current != incoming {
                warn!(%tool_id, %current, %incoming, "refusing to overwrite resolved report id");
                return Advance::Rejected(Rejection::ReportConflict(current));
            }
        }
        if task.status.is_terminal() && status != task.status {
            warn!(%tool_id, current = %task.status, requested = %status, "terminal task cannot change status");
            return Advance::Rejected(Rejection::Terminal(task.status));
        }

        let mut changed = false;
        if status != task.status {
            task.status = status;
            changed = true;
        }
        if task.report_id.is_none() && report_id.is_some() {
            task.report_id = report_id;
            changed = true;
        }
        if changed {
            debug!(%tool_id, %status, report_id = ?task.report_id, "task advanced");
            Advance::Applied
        } else {
            Advance::Unchanged
        }
    }

    /// Record display-only progress metadata; ignored once the task is terminal.
    pub fn record_progress(
        &mut self,
        tool_id: ToolId,
        progress: Option<f32>,
        current_step: Option<String>,
        error: Option<String>,
    ) {
        let Some(&position) = self.index.get(&tool_id) else {
            return;
        };
        let task = &mut self.tasks[position];
        if task.status.is_terminal() {
            return;
        }
        task.progress = progress.map(|p| p.clamp(0.0, 1.0));
        task.current_step = current_step;
        task.error = error;
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|task| task.status.is_terminal())
    }

    /// Tasks still awaiting a terminal status, in submission order.
    pub fn pending_ids(&self) -> Vec<ToolId> {
        self.tasks
            .iter()
            .filter(|task| !task.status.is_terminal())
            .map(|task| task.tool_id)
            .collect()
    }

    /// Every resolved report id, in submission order.
    pub fn resolved_reports(&self) -> Vec<(ToolId, ReportId)> {
        self.tasks
            .iter()
            .filter_map(|task| task.report_id.map(|report_id| (task.tool_id, report_id)))
            .collect()
    }

    /// Failed tasks as error values, in submission order.
    pub fn failures(&self) -> Vec<ScanError> {
        self.tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Failed)
            .map(|task| ScanError::TaskFailed {
                tool: task.tool_name.clone(),
                message: task
                    .error
                    .clone()
                    .unwrap_or_else(|| UNSPECIFIED_FAILURE.to_string()),
            })
            .collect()
    }

    pub fn get(&self, tool_id: ToolId) -> Option<&ScanTask> {
        self.index.get(&tool_id).map(|&position| &self.tasks[position])
    }

    pub fn snapshot(&self) -> Vec<ScanTask> {
        self.tasks.clone()
    }

    pub fn counts(&self) -> TaskCounts {
        TaskCounts::tally(&self.tasks)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tracker_with(names: &[&str]) -> TaskTracker {
        let mut tracker = TaskTracker::new();
        tracker
            .initialize(
                names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| ScanTask::pending(ToolId(i as i64 + 1), *name))
                    .collect(),
            )
            .unwrap();
        tracker
    }

    #[test]
    fn completes_and_resolves_report() {
        let mut tracker = tracker_with(&["ToolA", "ToolB"]);
        let outcome = tracker.advance(ToolId(1), TaskStatus::Completed, Some(ReportId(10)));
        assert_eq!(outcome, Advance::Applied);
        assert_eq!(tracker.resolved_reports(), vec![(ToolId(1), ReportId(10))]);
        assert_eq!(tracker.pending_ids(), vec![ToolId(2)]);
        assert!(!tracker.all_terminal());
    }

    #[test]
    fn terminal_tasks_never_move() {
        let mut tracker = tracker_with(&["ToolA"]);
        tracker.advance(ToolId(1), TaskStatus::Failed, None);
        assert_eq!(
            tracker.advance(ToolId(1), TaskStatus::Pending, None),
            Advance::Rejected(Rejection::Terminal(TaskStatus::Failed))
        );
        assert_eq!(
            tracker.advance(ToolId(1), TaskStatus::Completed, Some(ReportId(3))),
            Advance::Rejected(Rejection::Terminal(TaskStatus::Failed))
        );
        assert_eq!(
            tracker.advance(ToolId(1), TaskStatus::Failed, None),
            Advance::Unchanged
        );
        assert_eq!(tracker.get(ToolId(1)).unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn failed_tasks_surface_as_errors() {
        let mut tracker = tracker_with(&["ToolA", "ToolB", "ToolC"]);
        tracker.record_progress(ToolId(1), None, None, Some("upstream timeout".into()));
        tracker.advance(ToolId(1), TaskStatus::Failed, None);
        tracker.advance(ToolId(2), TaskStatus::Completed, Some(ReportId(4)));
        tracker.advance(ToolId(3), TaskStatus::Failed, None);

        let messages: Vec<String> = tracker.failures().iter().map(ToString::to_string).collect();
        assert_eq!(
            messages,
            vec![
                "scan of `ToolA` failed: upstream timeout",
                "scan of `ToolC` failed: analysis failed",
            ]
        );
        assert!(!tracker.failures()[0].is_transient());
    }

    #[test]
    fn resolved_report_id_is_write_once() {
        let mut tracker = tracker_with(&["ToolA"]);
        tracker.advance(ToolId(1), TaskStatus::Completed, Some(ReportId(7)));
        assert_eq!(
            tracker.advance(ToolId(1), TaskStatus::Completed, Some(ReportId(8))),
            Advance::Rejected(Rejection::ReportConflict(ReportId(7)))
        );
        assert_eq!(
            tracker.advance(ToolId(1), TaskStatus::Completed, Some(ReportId(7))),
            Advance::Unchanged
        );
        assert_eq!(tracker.get(ToolId(1)).unwrap().report_id, Some(ReportId(7)));
    }

    #[test]
    fn unknown_tasks_are_rejected() {
        let mut tracker = tracker_with(&["ToolA"]);
        assert_eq!(
            tracker.advance(ToolId(99), TaskStatus::Completed, None),
            Advance::Rejected(Rejection::UnknownTask)
        );
    }

    #[test]
    fn initialize_refuses_while_poll_attached() {
        let mut tracker = tracker_with(&["ToolA"]);
        tracker.attach_poll().unwrap();
        assert_eq!(
            tracker.initialize(vec![ScanTask::pending(ToolId(5), "ToolC")]),
            Err(TrackerError::PollActive)
        );
        assert_eq!(tracker.attach_poll(), Err(TrackerError::PollActive));
        tracker.detach_poll();
        tracker
            .initialize(vec![ScanTask::pending(ToolId(5), "ToolC")])
            .unwrap();
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn initialize_rejects_duplicate_tool_ids() {
        let mut tracker = TaskTracker::new();
        let err = tracker
            .initialize(vec![
                ScanTask::pending(ToolId(1), "ToolA"),
                ScanTask::pending(ToolId(1), "ToolA"),
            ])
            .unwrap_err();
        assert_eq!(err, TrackerError::DuplicateTask(ToolId(1)));
        assert!(tracker.is_empty());
    }

    #[test]
    fn progress_is_ignored_after_completion() {
        let mut tracker = tracker_with(&["ToolA"]);
        tracker.record_progress(ToolId(1), Some(1.7), Some("analyzing terms".into()), None);
        assert_eq!(tracker.get(ToolId(1)).unwrap().progress, Some(1.0));
        tracker.advance(ToolId(1), TaskStatus::Completed, Some(ReportId(2)));
        tracker.record_progress(ToolId(1), Some(0.1), None, Some("late".into()));
        let task = tracker.get(ToolId(1)).unwrap();
        assert_eq!(task.current_step.as_deref(), Some("analyzing terms"));
        assert!(task.error.is_none());
    }

    fn status_strategy() -> impl Strategy<Value = TaskStatus> {
        prop_oneof![
            Just(TaskStatus::Pending),
            Just(TaskStatus::Completed),
            Just(TaskStatus::Failed),
        ]
    }

    proptest! {
        #[test]
        fn one_task_per_submitted_tool(count in 0usize..40) {
            let tasks: Vec<_> = (0..count)
                .map(|i| ScanTask::pending(ToolId(i as i64), format!("tool-{i}")))
                .collect();
            let mut tracker = TaskTracker::new();
            tracker.initialize(tasks).unwrap();
            prop_assert_eq!(tracker.len(), count);
            prop_assert_eq!(tracker.pending_ids().len(), count);
        }

        #[test]
        fn terminal_status_is_sticky(updates in proptest::collection::vec(status_strategy(), 1..20)) {
            let mut tracker = tracker_with(&["ToolA"]);
            let mut settled: Option<TaskStatus> = None;
            for status in updates {
                tracker.advance(ToolId(1), status, None);
                let current = tracker.get(ToolId(1)).unwrap().status;
                if let Some(terminal) = settled {
                    prop_assert_eq!(current, terminal);
                } else if current.is_terminal() {
                    settled = Some(current);
                }
            }
        }
    }
}
