use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::api::ScanBackend;
use crate::error::{ScanError, ValidationError};
use crate::model::KnowledgeBaseEntry;
use crate::reconcile::{ActionKind, KbAction};

/// State of the control that triggers a knowledge-base action.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ActionControl {
    #[default]
    Enabled,
    /// A mutation is in flight; further triggers are ignored.
    Busy,
    /// The action settled; the control stays disabled with this label.
    Done(String),
}

impl ActionControl {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The knowledge base was written; carries the stored entry.
    Applied(KnowledgeBaseEntry),
    /// A local-only decision (ignore / keep) was recorded.
    Acknowledged,
    /// The control was not enabled, so nothing happened.
    Ignored,
}

/// Routes knowledge-base actions to the backend and keeps their controls honest.
pub struct Dispatcher<B: ?Sized> {
    backend: Arc<B>,
}

impl<B> Dispatcher<B>
where
    B: ScanBackend + ?Sized,
{
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Execute `action`, driving `control` through busy and done.
    ///
    /// Mutating actions disable the control for the duration of one backend
    /// call. On success the control is permanently done; on failure it is
    /// re-enabled so the user can retry.
    #[instrument(level = "debug", skip(self, control), fields(kind = %action.kind, tool = %action.tool_name))]
    pub async fn dispatch(
        &self,
        control: &mut ActionControl,
        action: &KbAction,
    ) -> Result<DispatchOutcome, ScanError> {
        if !control.is_enabled() {
            return Ok(DispatchOutcome::Ignored);
        }
        if !action.kind.is_mutating() {
            *control = ActionControl::Done(action.kind.done_label().to_string());
            return Ok(DispatchOutcome::Acknowledged);
        }
        let report_id = action.report_id.ok_or_else(|| ValidationError::MissingReportId {
            action: action.kind,
            tool: action.tool_name.clone(),
        })?;

        *control = ActionControl::Busy;
        let result = match action.kind {
            ActionKind::Create => {
                self.backend
                    .create_from_report(&action.tool_name, report_id)
                    .await
            }
            _ => {
                self.backend
                    .update_from_report(&action.tool_name, report_id)
                    .await
            }
        };

        match result {
            Ok(entry) => {
                *control = ActionControl::Done(action.kind.done_label().to_string());
                info!(%report_id, "knowledge base written");
                Ok(DispatchOutcome::Applied(entry))
            }
            Err(err) => {
                *control = ActionControl::Enabled;
                warn!(%report_id, error = %err, "knowledge-base action failed");
                Err(ScanError::Action {
                    action: action.kind,
                    tool: action.tool_name.clone(),
                    message: err.message(),
                })
            }
        }
    }
}
