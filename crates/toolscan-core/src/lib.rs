pub mod api;
pub mod classify;
pub mod collector;
pub mod dispatch;
pub mod error;
pub mod kb;
pub mod model;
pub mod poll;
pub mod reconcile;
pub mod render;
pub mod runner;
pub mod session;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use api::{BackendSettings, HttpBackend, ScanBackend};
pub use classify::{classify, LicenseCategory};
pub use collector::{Fetch, ReportCollector};
pub use dispatch::{ActionControl, DispatchOutcome, Dispatcher};
pub use error::{ScanError, TrackerError, ValidationError};
pub use kb::{KbCatalog, KbEditForm, KbPatch, LicenseFilter};
pub use model::{
    KbData, KbDetail, KbOrder, KnowledgeBaseEntry, Report, ReportId, ScanTask, TaskStatus, Tool,
    ToolId,
};
pub use poll::{PollHandle, PollLoop, PollSettings, PollSummary, StopReason, TickOutcome};
pub use reconcile::{present, ActionKind, KbAction, KbDirective};
pub use render::{OutputFormat, RenderSink};
pub use runner::{parse_tool_names, ScanRunner};
pub use session::ScanSession;
pub use tracker::{Advance, Rejection, TaskCounts, TaskTracker};
