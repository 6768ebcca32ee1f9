use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BackendSettings, ScanBackend};
use crate::error::ScanError;
use crate::model::{
    BatchToolResponse, KbData, KbDetail, KbListResponse, KbMutationResponse, KbOrder,
    KnowledgeBaseEntry, Report, ReportId, ScanStartResponse, ScanTask, TaskStatusReport, Tool,
    ToolId,
};

/// `ScanBackend` implementation speaking the service's JSON API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(settings: &BackendSettings) -> Result<Self> {
        let base = Url::parse(settings.base_url.trim())
            .with_context(|| format!("invalid backend base URL `{}`", settings.base_url))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("invalid backend base URL `{}`", settings.base_url));
        }
        let http = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("failed to build backend HTTP client")?;
        Ok(Self { http, base })
    }

    /// Build `{base}/api/v1/{segments...}`; segments are percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").push("v1").extend(segments);
        }
        url
    }

    async fn send(&self, context: &str, request: RequestBuilder) -> Result<Response, ScanError> {
        let response = request
            .send()
            .await
            .map_err(|err| ScanError::transport(context, err))?;
        let status = response.status();
        debug!(%status, context, "backend replied");
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = error_detail(&body).unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.to_string()
            } else {
                format!("{status}: {}", body.trim())
            }
        });
        Err(ScanError::transport(context, message))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        context: &str,
        request: RequestBuilder,
    ) -> Result<T, ScanError> {
        self.send(context, request)
            .await?
            .json::<T>()
            .await
            .map_err(|err| ScanError::transport(context, format!("unexpected response body: {err}")))
    }
}

/// FastAPI-style services wrap error text as `{"detail": "..."}`.
fn error_detail(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Detail {
        detail: serde_json::Value,
    }
    let parsed: Detail = serde_json::from_str(body).ok()?;
    Some(match parsed.detail {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    })
}

#[derive(Serialize)]
struct BatchToolRequest<'a> {
    tools: &'a [String],
}

#[derive(Serialize)]
struct ScanRequest<'a> {
    tool_ids: &'a [ToolId],
}

#[async_trait]
impl ScanBackend for HttpBackend {
    async fn register_tools(&self, names: &[String]) -> Result<Vec<Tool>, ScanError> {
        let url = self.endpoint(&["tools", "batch"]);
        let reply: BatchToolResponse = self
            .send_json(
                "tool registration",
                self.http.post(url).json(&BatchToolRequest { tools: names }),
            )
            .await?;
        debug!(
            created = reply.created,
            existing = reply.existing,
            "tools registered"
        );
        Ok(reply.tools)
    }

    async fn start_scan(&self, tool_ids: &[ToolId]) -> Result<Vec<ScanTask>, ScanError> {
        let url = self.endpoint(&["scan", "start"]);
        let reply: ScanStartResponse = self
            .send_json(
                "scan start",
                self.http.post(url).json(&ScanRequest { tool_ids }),
            )
            .await?;
        Ok(reply.tasks)
    }

    async fn scan_status(&self, tool_id: ToolId) -> Result<TaskStatusReport, ScanError> {
        let id = tool_id.to_string();
        let url = self.endpoint(&["scan", "status", &id]);
        self.send_json("status query", self.http.get(url)).await
    }

    async fn fetch_report(&self, report_id: ReportId) -> Result<Report, ScanError> {
        let id = report_id.to_string();
        let url = self.endpoint(&["reports", &id]);
        self.send_json("report fetch", self.http.get(url)).await
    }

    async fn create_from_report(
        &self,
        tool_name: &str,
        report_id: ReportId,
    ) -> Result<KnowledgeBaseEntry, ScanError> {
        let url = self.endpoint(&["knowledge-base", tool_name, "create-from-report"]);
        let reply: KbMutationResponse = self
            .send_json(
                "knowledge-base create",
                self.http.post(url).query(&[("report_id", report_id.0)]),
            )
            .await?;
        Ok(reply.into())
    }

    async fn update_from_report(
        &self,
        tool_name: &str,
        report_id: ReportId,
    ) -> Result<KnowledgeBaseEntry, ScanError> {
        let url = self.endpoint(&["knowledge-base", tool_name, "update-from-report"]);
        let reply: KbMutationResponse = self
            .send_json(
                "knowledge-base update",
                self.http.post(url).query(&[("report_id", report_id.0)]),
            )
            .await?;
        Ok(reply.into())
    }

    async fn kb_entry(&self, tool_name: &str) -> Result<KnowledgeBaseEntry, ScanError> {
        let url = self.endpoint(&["knowledge-base", tool_name]);
        self.send_json("knowledge-base read", self.http.get(url))
            .await
    }

    async fn kb_detail(&self, tool_name: &str) -> Result<KbDetail, ScanError> {
        let url = self.endpoint(&["knowledge-base", tool_name, "detail"]);
        self.send_json("knowledge-base detail", self.http.get(url))
            .await
    }

    async fn kb_replace(
        &self,
        tool_name: &str,
        data: &KbData,
    ) -> Result<KnowledgeBaseEntry, ScanError> {
        let url = self.endpoint(&["knowledge-base", tool_name]);
        let reply: KbMutationResponse = self
            .send_json("knowledge-base save", self.http.put(url).json(data))
            .await?;
        Ok(reply.into())
    }

    async fn kb_delete(&self, tool_name: &str) -> Result<(), ScanError> {
        let url = self.endpoint(&["knowledge-base", tool_name]);
        self.send("knowledge-base delete", self.http.delete(url))
            .await
            .map(|_| ())
    }

    async fn kb_list(
        &self,
        limit: usize,
        order: KbOrder,
    ) -> Result<Vec<KnowledgeBaseEntry>, ScanError> {
        let url = self.endpoint(&["knowledge-base"]);
        let reply: KbListResponse = self
            .send_json(
                "knowledge-base list",
                self.http
                    .get(url)
                    .query(&[("limit", limit.to_string()), ("order_by", order.as_str().into())]),
            )
            .await?;
        Ok(reply.entries)
    }
}
