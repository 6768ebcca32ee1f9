use std::fmt;

use serde::Serialize;

use crate::model::{value_text, FieldChange, KbUpdateAction, Report, ReportId};

/// Placeholder shown for the missing side of an added or removed field.
pub const ABSENT: &str = "(absent)";
/// Field changes listed inline before the view is truncated.
pub const MAX_LISTED_CHANGES: usize = 5;

/// Knowledge-base operations offered next to a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Ignore,
    Update,
    Keep,
}

impl ActionKind {
    /// Whether the action writes to the knowledge base.
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Ignore => "ignore",
            Self::Update => "update",
            Self::Keep => "keep",
        }
    }

    /// Label of the control before it is used.
    pub fn prompt(self) -> &'static str {
        match self {
            Self::Create => "Save to knowledge base",
            Self::Ignore => "Ignore",
            Self::Update => "Update knowledge base",
            Self::Keep => "Keep existing",
        }
    }

    /// Label of the control once the action has settled.
    pub fn done_label(self) -> &'static str {
        match self {
            Self::Create => "Saved",
            Self::Ignore => "Ignored",
            Self::Update => "Updated",
            Self::Keep => "Kept",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-invocable knowledge-base operation bound to one report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KbAction {
    pub kind: ActionKind,
    pub tool_name: String,
    pub report_id: Option<ReportId>,
}

/// One field difference as displayed: label plus old/new text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeLine {
    pub label: String,
    pub old: String,
    pub new: String,
}

/// What to show about the knowledge base next to a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum KbDirective {
    None,
    PendingCreation {
        actions: Vec<KbAction>,
    },
    Diff {
        summary: String,
        changes: Vec<ChangeLine>,
        total_changes: usize,
        truncated: bool,
        actions: Vec<KbAction>,
    },
}

impl KbDirective {
    pub fn actions(&self) -> &[KbAction] {
        match self {
            Self::None => &[],
            Self::PendingCreation { actions } | Self::Diff { actions, .. } => actions,
        }
    }

    pub fn action(&self, kind: ActionKind) -> Option<&KbAction> {
        self.actions().iter().find(|action| action.kind == kind)
    }
}

/// Decide which knowledge-base block and actions accompany `report`.
pub fn present(report: &Report) -> KbDirective {
    let Some(update) = report
        .knowledge_base_update
        .as_ref()
        .filter(|update| update.available)
    else {
        return KbDirective::None;
    };

    let tool_name = report.tool_name().to_string();
    let report_id = report.report_id();
    let action = |kind| KbAction {
        kind,
        tool_name: tool_name.clone(),
        report_id,
    };

    match update.action {
        Some(KbUpdateAction::PendingCreation) => KbDirective::PendingCreation {
            actions: vec![action(ActionKind::Create), action(ActionKind::Ignore)],
        },
        Some(KbUpdateAction::DiffAvailable) => {
            let listed = update.changes.len();
            let total_changes = update.change_count.unwrap_or(listed).max(listed);
            let summary = update
                .summary
                .as_deref()
                .map(str::trim)
                .filter(|summary| !summary.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("{total_changes} difference(s) found"));
            let changes = update
                .changes
                .iter()
                .take(MAX_LISTED_CHANGES)
                .map(change_line)
                .collect();
            let actions = if update.has_changes {
                vec![action(ActionKind::Update), action(ActionKind::Keep)]
            } else {
                Vec::new()
            };
            KbDirective::Diff {
                summary,
                changes,
                total_changes,
                truncated: total_changes > MAX_LISTED_CHANGES,
                actions,
            }
        }
        Some(KbUpdateAction::Unknown) | None => KbDirective::None,
    }
}

fn change_line(change: &FieldChange) -> ChangeLine {
    let side = |value: &Option<serde_json::Value>| match value {
        Some(serde_json::Value::Null) | None => ABSENT.to_string(),
        Some(value) => value_text(value),
    };
    ChangeLine {
        label: change.label().to_string(),
        old: side(&change.old_value),
        new: side(&change.new_value),
    }
}
