use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, instrument};

use crate::api::ScanBackend;
use crate::error::{ScanError, ValidationError};
use crate::model::ToolId;
use crate::poll::{PollHandle, PollLoop, PollSettings, PollSummary};
use crate::render::RenderSink;
use crate::session::ScanSession;

static TOOL_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\r\n,]+").expect("valid regex"));

/// Split raw user input into tool names.
///
/// Names are separated by newlines or commas, trimmed, and deduplicated
/// keeping the first occurrence.
pub fn parse_tool_names(input: &str) -> Result<Vec<String>, ValidationError> {
    let mut seen = HashSet::new();
    let names: Vec<String> = TOOL_SEPARATORS
        .split(input)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err(ValidationError::EmptyToolList);
    }
    Ok(names)
}

/// Starts scan runs and owns the single active poll loop.
pub struct ScanRunner<B: ?Sized, R: ?Sized> {
    backend: Arc<B>,
    sink: Arc<R>,
    session: Arc<ScanSession>,
    settings: PollSettings,
    active: Option<PollHandle>,
}

impl<B, R> ScanRunner<B, R>
where
    B: ScanBackend + ?Sized + 'static,
    R: RenderSink + ?Sized + 'static,
{
    pub fn new(backend: Arc<B>, sink: Arc<R>, settings: PollSettings) -> Self {
        Self {
            backend,
            sink,
            session: Arc::new(ScanSession::new()),
            settings,
            active: None,
        }
    }

    pub fn session(&self) -> &Arc<ScanSession> {
        &self.session
    }

    pub fn is_polling(&self) -> bool {
        self.active.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Register the tools named in `input`, start scanning them and begin polling.
    ///
    /// Any loop left over from a previous run is stopped first. Returns the
    /// number of tracked tasks.
    #[instrument(level = "debug", skip(self, input))]
    pub async fn start(&mut self, input: &str) -> Result<usize, ScanError> {
        let names = parse_tool_names(input)?;
        if let Some(previous) = self.active.take() {
            let summary = previous.stop().await;
            info!(ticks = summary.ticks, "previous poll loop stopped");
        }

        let tools = self.backend.register_tools(&names).await?;
        if tools.len() != names.len() {
            return Err(ScanError::transport(
                "tool registration",
                format!("expected {} tools, backend returned {}", names.len(), tools.len()),
            ));
        }
        let tool_ids: Vec<ToolId> = tools.iter().map(|tool| tool.id).collect();
        let tasks = self.backend.start_scan(&tool_ids).await?;
        if tasks.len() != tool_ids.len() {
            return Err(ScanError::transport(
                "scan start",
                format!(
                    "expected {} tasks, backend returned {}",
                    tool_ids.len(),
                    tasks.len()
                ),
            ));
        }

        let count = tasks.len();
        self.session.begin_run(tasks)?;
        let poll = PollLoop::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.sink),
            Arc::clone(&self.session),
            self.settings,
        )?;
        self.active = Some(poll.spawn());
        info!(tasks = count, "scan started");
        Ok(count)
    }

    /// Wait for the active loop to finish on its own.
    ///
    /// Cancel-safe: if the returned future is dropped the loop keeps its slot
    /// and can still be stopped.
    pub async fn wait(&mut self) -> anyhow::Result<Option<PollSummary>> {
        let Some(handle) = self.active.as_mut() else {
            return Ok(None);
        };
        let summary = handle.join().await;
        self.active = None;
        summary.map(Some)
    }

    /// Cancel the active loop, if any.
    pub async fn stop(&mut self) -> Option<PollSummary> {
        match self.active.take() {
            Some(handle) => Some(handle.stop().await),
            None => None,
        }
    }
}
