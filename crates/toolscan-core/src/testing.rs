//! In-memory collaborators used by unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::api::ScanBackend;
use crate::error::ScanError;
use crate::model::{
    KbData, KbDetail, KbOrder, KnowledgeBaseEntry, LicenseInfo, Report, ReportId, ScanTask,
    TaskResult, TaskStatus, TaskStatusReport, Tool, ToolId,
};
use crate::reconcile::KbDirective;
use crate::render::RenderSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    Register,
    Start,
    Status,
    Report,
    Create,
    Update,
    Entry,
    Detail,
    Replace,
    Delete,
    List,
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    statuses: Mutex<HashMap<ToolId, VecDeque<TaskStatusReport>>>,
    reports: Mutex<HashMap<ReportId, Value>>,
    kb: Mutex<BTreeMap<String, KbData>>,
    calls: Mutex<HashMap<Op, usize>>,
    failures: Mutex<HashMap<Op, usize>>,
    registered: Mutex<Vec<Tool>>,
    dropped_tasks: Mutex<usize>,
    report_gate: Option<Arc<Notify>>,
}

pub(crate) fn status(tool_id: i64, status: TaskStatus, report_id: Option<i64>) -> TaskStatusReport {
    TaskStatusReport {
        tool_id: ToolId(tool_id),
        tool_name: format!("tool-{tool_id}"),
        status,
        progress: None,
        current_step: None,
        result: report_id.map(|id| TaskResult {
            report_id: Some(ReportId(id)),
            message: None,
        }),
        error: None,
    }
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Hold every report fetch until `gate` is notified.
    pub(crate) fn with_report_gate(gate: Arc<Notify>) -> Self {
        Self {
            report_gate: Some(gate),
            ..Self::default()
        }
    }

    /// Replies returned by successive status queries; the last one repeats.
    pub(crate) fn script(&self, tool_id: i64, replies: Vec<TaskStatusReport>) {
        self.statuses
            .lock()
            .unwrap()
            .insert(ToolId(tool_id), replies.into());
    }

    pub(crate) fn add_report(&self, report_id: i64, tool_name: &str, kb_update: Value) {
        self.reports.lock().unwrap().insert(
            ReportId(report_id),
            json!({
                "tool": {"name": tool_name},
                "data_source": {"ai_analysis": true, "knowledge_base": false},
                "license_info": {"license_type": "Commercial"},
                "compliance_report": {"id": report_id},
                "knowledge_base_update": kb_update
            }),
        );
    }

    pub(crate) fn add_entry(&self, tool_name: &str, data: Value) {
        self.kb.lock().unwrap().insert(
            tool_name.to_string(),
            serde_json::from_value(data).unwrap(),
        );
    }

    pub(crate) fn entry(&self, tool_name: &str) -> Option<KbData> {
        self.kb.lock().unwrap().get(tool_name).cloned()
    }

    /// Make the next `times` calls of `op` fail with a transport error.
    pub(crate) fn fail_next(&self, op: Op, times: usize) {
        self.failures.lock().unwrap().insert(op, times);
    }

    /// Have `start_scan` omit this many tasks from its reply.
    pub(crate) fn drop_tasks(&self, count: usize) {
        *self.dropped_tasks.lock().unwrap() = count;
    }

    pub(crate) fn calls(&self, op: Op) -> usize {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    fn enter(&self, op: Op) -> Result<(), ScanError> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(ScanError::transport(format!("{op:?}"), "503 Service Unavailable"))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ScanBackend for FakeBackend {
    async fn register_tools(&self, names: &[String]) -> Result<Vec<Tool>, ScanError> {
        self.enter(Op::Register)?;
        let mut registered = self.registered.lock().unwrap();
        let tools: Vec<Tool> = names
            .iter()
            .map(|name| {
                if let Some(tool) = registered.iter().find(|tool| &tool.name == name) {
                    return tool.clone();
                }
                let tool = Tool {
                    id: ToolId(registered.len() as i64 + 1),
                    name: name.clone(),
                    version: None,
                    source: None,
                };
                registered.push(tool.clone());
                tool
            })
            .collect();
        Ok(tools)
    }

    async fn start_scan(&self, tool_ids: &[ToolId]) -> Result<Vec<ScanTask>, ScanError> {
        self.enter(Op::Start)?;
        let registered = self.registered.lock().unwrap();
        let dropped = *self.dropped_tasks.lock().unwrap();
        Ok(tool_ids
            .iter()
            .skip(dropped)
            .map(|id| {
                let name = registered
                    .iter()
                    .find(|tool| tool.id == *id)
                    .map(|tool| tool.name.clone())
                    .unwrap_or_default();
                ScanTask::pending(*id, name)
            })
            .collect())
    }

    async fn scan_status(&self, tool_id: ToolId) -> Result<TaskStatusReport, ScanError> {
        self.enter(Op::Status)?;
        let mut statuses = self.statuses.lock().unwrap();
        let queue = statuses.entry(tool_id).or_default();
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(reply.unwrap_or_else(|| status(tool_id.0, TaskStatus::Pending, None)))
    }

    async fn fetch_report(&self, report_id: ReportId) -> Result<Report, ScanError> {
        self.enter(Op::Report)?;
        if let Some(gate) = &self.report_gate {
            gate.notified().await;
        }
        let value = self
            .reports
            .lock()
            .unwrap()
            .get(&report_id)
            .cloned()
            .ok_or_else(|| ScanError::transport("report fetch", format!("report not found: ID {report_id}")))?;
        Ok(serde_json::from_value(value).unwrap())
    }

    async fn create_from_report(
        &self,
        tool_name: &str,
        _report_id: ReportId,
    ) -> Result<KnowledgeBaseEntry, ScanError> {
        self.enter(Op::Create)?;
        let data = KbData {
            license_type: Some("Commercial".into()),
            source: Some("report".into()),
            ..KbData::default()
        };
        self.kb
            .lock()
            .unwrap()
            .insert(tool_name.to_string(), data.clone());
        Ok(KnowledgeBaseEntry {
            tool_name: tool_name.to_string(),
            data,
        })
    }

    async fn update_from_report(
        &self,
        tool_name: &str,
        report_id: ReportId,
    ) -> Result<KnowledgeBaseEntry, ScanError> {
        self.enter(Op::Update)?;
        let mut kb = self.kb.lock().unwrap();
        let data = kb.entry(tool_name.to_string()).or_default();
        data.updated_by = Some(format!("report {report_id}"));
        Ok(KnowledgeBaseEntry {
            tool_name: tool_name.to_string(),
            data: data.clone(),
        })
    }

    async fn kb_entry(&self, tool_name: &str) -> Result<KnowledgeBaseEntry, ScanError> {
        self.enter(Op::Entry)?;
        self.entry(tool_name)
            .map(|data| KnowledgeBaseEntry {
                tool_name: tool_name.to_string(),
                data,
            })
            .ok_or_else(|| ScanError::transport("knowledge-base read", "entry not found"))
    }

    async fn kb_detail(&self, tool_name: &str) -> Result<KbDetail, ScanError> {
        self.enter(Op::Detail)?;
        let data = self
            .entry(tool_name)
            .ok_or_else(|| ScanError::transport("knowledge-base detail", "entry not found"))?;
        Ok(KbDetail {
            tool_name: tool_name.to_string(),
            license_info: LicenseInfo {
                license_type: data.license_type,
                license_version: data.license_version,
                license_mode: data.license_mode,
            },
            source: data.source,
            updated_at: data.updated_at,
            updated_by: data.updated_by,
            ..KbDetail::default()
        })
    }

    async fn kb_replace(
        &self,
        tool_name: &str,
        data: &KbData,
    ) -> Result<KnowledgeBaseEntry, ScanError> {
        self.enter(Op::Replace)?;
        self.kb
            .lock()
            .unwrap()
            .insert(tool_name.to_string(), data.clone());
        Ok(KnowledgeBaseEntry {
            tool_name: tool_name.to_string(),
            data: data.clone(),
        })
    }

    async fn kb_delete(&self, tool_name: &str) -> Result<(), ScanError> {
        self.enter(Op::Delete)?;
        self.kb
            .lock()
            .unwrap()
            .remove(tool_name)
            .map(|_| ())
            .ok_or_else(|| ScanError::transport("knowledge-base delete", "entry not found"))
    }

    async fn kb_list(
        &self,
        limit: usize,
        order: KbOrder,
    ) -> Result<Vec<KnowledgeBaseEntry>, ScanError> {
        self.enter(Op::List)?;
        let mut entries: Vec<_> = self
            .kb
            .lock()
            .unwrap()
            .iter()
            .map(|(tool_name, data)| KnowledgeBaseEntry {
                tool_name: tool_name.clone(),
                data: data.clone(),
            })
            .collect();
        if order == KbOrder::UpdatedAt {
            entries.sort_by(|a, b| b.data.updated_at.cmp(&a.data.updated_at));
        }
        entries.truncate(limit);
        Ok(entries)
    }
}

/// `RenderSink` that records every call.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) task_views: Mutex<Vec<Vec<ScanTask>>>,
    pub(crate) reports: Mutex<Vec<(String, KbDirective)>>,
}

impl RecordingSink {
    pub(crate) fn task_renders(&self) -> usize {
        self.task_views.lock().unwrap().len()
    }

    pub(crate) fn report_renders(&self) -> usize {
        self.reports.lock().unwrap().len()
    }
}

impl RenderSink for RecordingSink {
    fn tasks(&self, tasks: &[ScanTask]) {
        self.task_views.lock().unwrap().push(tasks.to_vec());
    }

    fn report(&self, report: &Report, directive: &KbDirective) {
        self.reports
            .lock()
            .unwrap()
            .push((report.tool_name().to_string(), directive.clone()));
    }
}
