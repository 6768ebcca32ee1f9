mod http;
mod settings;

use async_trait::async_trait;

use crate::error::ScanError;
use crate::model::{
    KbData, KbDetail, KbOrder, KnowledgeBaseEntry, Report, ReportId, ScanTask, TaskStatusReport,
    Tool, ToolId,
};

pub use http::HttpBackend;
pub use settings::BackendSettings;

/// Backend collaborator that owns scan execution and knowledge-base storage.
///
/// Every method maps to one HTTP call. Non-2xx replies surface as
/// [`ScanError::Transport`] carrying the backend's message.
#[async_trait]
pub trait ScanBackend: Send + Sync {
    /// Register tool names, returning their identifiers in submission order.
    async fn register_tools(&self, names: &[String]) -> Result<Vec<Tool>, ScanError>;

    /// Start scanning the given tools, returning the initial task list.
    async fn start_scan(&self, tool_ids: &[ToolId]) -> Result<Vec<ScanTask>, ScanError>;

    async fn scan_status(&self, tool_id: ToolId) -> Result<TaskStatusReport, ScanError>;

    async fn fetch_report(&self, report_id: ReportId) -> Result<Report, ScanError>;

    /// Accept a report into the knowledge base as a new entry.
    async fn create_from_report(
        &self,
        tool_name: &str,
        report_id: ReportId,
    ) -> Result<KnowledgeBaseEntry, ScanError>;

    /// Overwrite an existing entry with the report's findings.
    async fn update_from_report(
        &self,
        tool_name: &str,
        report_id: ReportId,
    ) -> Result<KnowledgeBaseEntry, ScanError>;

    async fn kb_entry(&self, tool_name: &str) -> Result<KnowledgeBaseEntry, ScanError>;

    async fn kb_detail(&self, tool_name: &str) -> Result<KbDetail, ScanError>;

    async fn kb_replace(
        &self,
        tool_name: &str,
        data: &KbData,
    ) -> Result<KnowledgeBaseEntry, ScanError>;

    async fn kb_delete(&self, tool_name: &str) -> Result<(), ScanError>;

    async fn kb_list(
        &self,
        limit: usize,
        order: KbOrder,
    ) -> Result<Vec<KnowledgeBaseEntry>, ScanError>;
}
