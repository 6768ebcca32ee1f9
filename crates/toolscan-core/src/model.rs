use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Backend identifier of a registered tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolId(pub i64);

/// Backend identifier of a compliance report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(pub i64);

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tool registered with the backend ahead of a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub id: ToolId,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Lifecycle of a scan task. The backend's intermediate `processing` state
/// is folded into `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[serde(alias = "processing")]
    Pending,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked unit of compliance analysis, one per submitted tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTask {
    pub tool_id: ToolId,
    pub tool_name: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub report_id: Option<ReportId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanTask {
    pub fn pending(tool_id: ToolId, tool_name: impl Into<String>) -> Self {
        Self {
            tool_id,
            tool_name: tool_name.into(),
            status: TaskStatus::Pending,
            report_id: None,
            progress: None,
            current_step: None,
            error: None,
        }
    }
}

/// Reply of `GET /scan/status/{tool_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusReport {
    pub tool_id: ToolId,
    #[serde(default)]
    pub tool_name: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: Option<f32>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskStatusReport {
    pub fn report_id(&self) -> Option<ReportId> {
        self.result.as_ref().and_then(|result| result.report_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default)]
    pub report_id: Option<ReportId>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Reply of `POST /tools/batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchToolResponse {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub created: usize,
    #[serde(default)]
    pub existing: usize,
    pub tools: Vec<Tool>,
}

/// Reply of `POST /scan/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStartResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub task_count: usize,
    #[serde(default)]
    pub tool_ids: Vec<ToolId>,
    #[serde(default)]
    pub tasks: Vec<ScanTask>,
}

/// Immutable output of analyzing one tool, as served by `GET /reports/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default)]
    pub tool: ReportTool,
    #[serde(default)]
    pub data_source: DataSource,
    #[serde(default)]
    pub license_info: LicenseInfo,
    #[serde(default)]
    pub company_info: CompanyInfo,
    #[serde(default)]
    pub commercial_restrictions: CommercialRestrictions,
    #[serde(default)]
    pub alternative_tools: Vec<AlternativeTool>,
    #[serde(default)]
    pub compliance_report: Option<ComplianceSummary>,
    #[serde(default)]
    pub knowledge_base_update: Option<KnowledgeBaseUpdate>,
}

impl Report {
    pub const UNKNOWN_TOOL: &'static str = "unknown tool";

    pub fn tool_name(&self) -> &str {
        self.tool
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(Self::UNKNOWN_TOOL)
    }

    pub fn report_id(&self) -> Option<ReportId> {
        self.compliance_report.as_ref().map(|summary| summary.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportTool {
    #[serde(default)]
    pub id: Option<ToolId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub tos_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceSummary {
    pub id: ReportId,
    #[serde(default)]
    pub is_compliant: Option<bool>,
}

/// Where the report's facts came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(default, deserialize_with = "truthy")]
    pub ai_analysis: bool,
    #[serde(default, deserialize_with = "truthy")]
    pub knowledge_base: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Mixed,
    Ai,
    KnowledgeBase,
    None,
}

impl DataSource {
    pub fn provenance(self) -> Provenance {
        match (self.ai_analysis, self.knowledge_base) {
            (true, true) => Provenance::Mixed,
            (true, false) => Provenance::Ai,
            (false, true) => Provenance::KnowledgeBase,
            (false, false) => Provenance::None,
        }
    }
}

impl Provenance {
    pub fn label(self) -> &'static str {
        match self {
            Self::Mixed => "mixed (AI analysis + knowledge base)",
            Self::Ai => "AI analysis",
            Self::KnowledgeBase => "knowledge base",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LicenseInfo {
    #[serde(default, deserialize_with = "lenient_text")]
    pub license_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub license_version: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub license_mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyInfo {
    #[serde(default, deserialize_with = "lenient_text")]
    pub company_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub company_country: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub company_headquarters: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub china_office: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommercialRestrictions {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub commercial_license_required: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub free_for_commercial: Option<bool>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub restrictions: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub user_limit: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub feature_restrictions: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlternativeTool {
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "lenient_text")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub license: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub advantages: Option<String>,
    #[serde(default, alias = "use_scenario", deserialize_with = "lenient_text")]
    pub use_case: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub link: Option<String>,
}

/// Reconciliation hint computed by the backend for a fresh report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseUpdate {
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub action: Option<KbUpdateAction>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub change_count: Option<usize>,
    #[serde(default)]
    pub changes: Vec<FieldChange>,
    #[serde(default)]
    pub has_changes: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KbUpdateAction {
    PendingCreation,
    DiffAvailable,
    #[serde(other)]
    Unknown,
}

/// Field-level difference between the knowledge base (old) and the fresh report (new).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub field_label: Option<String>,
    #[serde(default)]
    pub old_value: Option<Value>,
    #[serde(default)]
    pub new_value: Option<Value>,
    #[serde(default)]
    pub change_type: Option<ChangeType>,
}

impl FieldChange {
    pub fn label(&self) -> &str {
        self.field_label
            .as_deref()
            .filter(|label| !label.trim().is_empty())
            .unwrap_or(&self.field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
    #[serde(other)]
    Unknown,
}

/// Sort order supported by `GET /knowledge-base`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KbOrder {
    #[default]
    ToolName,
    UpdatedAt,
}

impl KbOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolName => "tool_name",
            Self::UpdatedAt => "updated_at",
        }
    }
}

/// One knowledge-base record keyed by tool name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseEntry {
    pub tool_name: String,
    #[serde(default)]
    pub data: KbData,
}

/// Structured knowledge-base metadata. Fields the client does not model are
/// kept in `extra` so a read-modify-write cycle never drops them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KbData {
    #[serde(default, deserialize_with = "lenient_text")]
    pub license_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub license_version: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub license_mode: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub company_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub company_country: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub company_headquarters: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub china_office: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub commercial_license_required: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub free_for_commercial: Option<bool>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub commercial_restrictions: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub user_limit: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub feature_restrictions: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub alternative_tools: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub updated_at: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub updated_by: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Reply of `GET /knowledge-base`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KbListResponse {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub entries: Vec<KnowledgeBaseEntry>,
}

/// Display-oriented view served by `GET /knowledge-base/{tool}/detail`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KbDetail {
    pub tool_name: String,
    #[serde(default)]
    pub license_info: LicenseInfo,
    #[serde(default)]
    pub company_info: CompanyInfo,
    #[serde(default)]
    pub commercial_restrictions: CommercialRestrictions,
    #[serde(default)]
    pub alternative_tools: Vec<AlternativeTool>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

/// Reply of the knowledge-base write endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbMutationResponse {
    #[serde(default)]
    pub message: Option<String>,
    pub tool_name: String,
    #[serde(default)]
    pub data: KbData,
}

impl From<KbMutationResponse> for KnowledgeBaseEntry {
    fn from(response: KbMutationResponse) -> Self {
        Self {
            tool_name: response.tool_name,
            data: response.data,
        }
    }
}

/// Render an arbitrary JSON value as display text; strings lose their quotes.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => false,
        Value::Bool(flag) => flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => Some(flag),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    })
}

fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        _ => Vec::new(),
    })
}
