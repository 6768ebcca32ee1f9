use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::api::ScanBackend;
use crate::collector::Fetch;
use crate::error::TrackerError;
use crate::model::TaskStatus;
use crate::reconcile::present;
use crate::render::RenderSink;
use crate::session::ScanSession;

/// Timing of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Ticks after which polling gives up; `None` polls until every task settles.
    pub max_ticks: Option<u64>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL,
            max_ticks: Some(Self::DEFAULT_MAX_TICKS),
        }
    }
}

impl PollSettings {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
    pub const DEFAULT_MAX_TICKS: u64 = 1800;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every task reached a terminal status.
    Completed,
    /// The tick bound ran out; unresolved tasks stay pending.
    TickLimit,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub ticks: u64,
    pub reports_fetched: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub tick: u64,
    /// All tasks are terminal; the loop stops after this tick.
    pub finished: bool,
}

#[derive(Debug, Default)]
struct PollStats {
    ticks: AtomicU64,
    reports_fetched: AtomicUsize,
}

fn summarize(session: &ScanSession, stats: &PollStats, stop_reason: StopReason) -> PollSummary {
    let counts = session.with_tracker(|tracker| tracker.counts());
    PollSummary {
        ticks: stats.ticks.load(Ordering::SeqCst),
        reports_fetched: stats.reports_fetched.load(Ordering::SeqCst),
        completed: counts.completed,
        failed: counts.failed,
        pending: counts.pending,
        stop_reason,
    }
}

/// Periodic driver that moves the session's tasks to completion.
///
/// Holds the tracker's poll lease from construction until drop, so a second
/// loop cannot attach and the tracker cannot be re-initialized underneath it.
pub struct PollLoop<B: ?Sized, R: ?Sized> {
    backend: Arc<B>,
    sink: Arc<R>,
    session: Arc<ScanSession>,
    settings: PollSettings,
    stats: Arc<PollStats>,
}

impl<B, R> PollLoop<B, R>
where
    B: ScanBackend + ?Sized,
    R: RenderSink + ?Sized,
{
    pub fn new(
        backend: Arc<B>,
        sink: Arc<R>,
        session: Arc<ScanSession>,
        settings: PollSettings,
    ) -> Result<Self, TrackerError> {
        session.with_tracker(|tracker| tracker.attach_poll())?;
        Ok(Self {
            backend,
            sink,
            session,
            settings,
            stats: Arc::default(),
        })
    }

    pub fn session(&self) -> &Arc<ScanSession> {
        &self.session
    }

    /// Run a single poll cycle.
    ///
    /// Status queries for every unsettled task go out concurrently; replies
    /// are applied in submission order before any report is fetched, and the
    /// task view is rendered only after all of this tick's mutations.
    #[instrument(level = "debug", skip(self))]
    pub async fn tick(&mut self) -> TickOutcome {
        let tick = self.stats.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let pending = self.session.with_tracker(|tracker| tracker.pending_ids());
        debug!(tick, pending = pending.len(), "polling task status");

        let backend = &self.backend;
        let replies = join_all(pending.iter().map(|&tool_id| backend.scan_status(tool_id))).await;

        self.session.with_tracker(|tracker| {
            for (&tool_id, reply) in pending.iter().zip(replies) {
                match reply {
                    Ok(reply) => {
                        let report_id = reply.report_id();
                        tracker.record_progress(
                            tool_id,
                            reply.progress,
                            reply.current_step,
                            reply.error.clone(),
                        );
                        tracker.advance(tool_id, reply.status, report_id);
                        if reply.status == TaskStatus::Failed {
                            warn!(
                                %tool_id,
                                error = reply.error.as_deref().unwrap_or("unspecified"),
                                "scan task failed"
                            );
                        }
                    }
                    Err(err) => warn!(%tool_id, error = %err, "status query failed; retrying next tick"),
                }
            }
        });

        self.fetch_resolved().await;

        let snapshot = self.session.snapshot();
        self.sink.tasks(&snapshot);

        let finished = snapshot.iter().all(|task| task.status.is_terminal());
        if finished {
            self.fetch_resolved().await;
        }
        TickOutcome { tick, finished }
    }

    /// Fetch every resolved report the collector has not retrieved yet,
    /// rendering the ones that arrive fresh.
    async fn fetch_resolved(&self) {
        let collector = self.session.collector();
        let unfetched: Vec<_> = self
            .session
            .with_tracker(|tracker| tracker.resolved_reports())
            .into_iter()
            .filter(|(_, report_id)| !collector.is_resolved(*report_id))
            .collect();
        if unfetched.is_empty() {
            return;
        }

        let backend = &*self.backend;
        let fetches = join_all(
            unfetched
                .iter()
                .map(|&(_, report_id)| collector.fetch_once(backend, report_id)),
        )
        .await;

        for ((tool_id, report_id), fetch) in unfetched.into_iter().zip(fetches) {
            match fetch {
                Ok(Fetch::Fresh(report)) => {
                    let directive = present(&report);
                    self.sink.report(&report, &directive);
                    self.stats.reports_fetched.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Fetch::Cached(_)) | Ok(Fetch::InFlight) => {}
                Err(err) => {
                    warn!(%tool_id, %report_id, error = %err, "report fetch failed; retrying next tick")
                }
            }
        }
    }

    /// Tick on a fixed interval until all tasks settle or the tick bound runs out.
    ///
    /// The first tick fires one interval after the call.
    pub async fn run(mut self) -> PollSummary {
        let period = self.settings.interval.max(Duration::from_millis(1));
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            if let Some(limit) = self.settings.max_ticks {
                if self.stats.ticks.load(Ordering::SeqCst) >= limit {
                    break StopReason::TickLimit;
                }
            }
            interval.tick().await;
            if self.tick().await.finished {
                break StopReason::Completed;
            }
        };

        let summary = summarize(&self.session, &self.stats, reason);
        info!(
            ticks = summary.ticks,
            reports = summary.reports_fetched,
            pending = summary.pending,
            reason = ?summary.stop_reason,
            "poll loop stopped"
        );
        summary
    }
}

impl<B, R> PollLoop<B, R>
where
    B: ScanBackend + ?Sized + 'static,
    R: RenderSink + ?Sized + 'static,
{
    /// Move the loop onto the runtime, returning a handle that can stop it.
    pub fn spawn(self) -> PollHandle {
        let session = Arc::clone(&self.session);
        let stats = Arc::clone(&self.stats);
        PollHandle {
            task: tokio::spawn(self.run()),
            session,
            stats,
        }
    }
}

impl<B: ?Sized, R: ?Sized> Drop for PollLoop<B, R> {
    fn drop(&mut self) {
        self.session.with_tracker(|tracker| tracker.detach_poll());
    }
}

/// Owner handle of a spawned poll loop.
pub struct PollHandle {
    task: JoinHandle<PollSummary>,
    session: Arc<ScanSession>,
    stats: Arc<PollStats>,
}

impl PollHandle {
    pub fn session(&self) -> &Arc<ScanSession> {
        &self.session
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the loop and wait until it has released the tracker.
    ///
    /// A loop that already finished reports its own summary.
    pub async fn stop(self) -> PollSummary {
        self.task.abort();
        match self.task.await {
            Ok(summary) => summary,
            Err(err) => {
                if err.is_panic() {
                    warn!(error = %err, "poll loop panicked");
                }
                let summary = summarize(&self.session, &self.stats, StopReason::Cancelled);
                info!(ticks = summary.ticks, "poll loop cancelled");
                summary
            }
        }
    }

    /// Wait for the loop to stop on its own.
    ///
    /// Cancel-safe: dropping the returned future leaves the loop running and
    /// the handle usable. Must not be called again once it has returned.
    pub async fn join(&mut self) -> anyhow::Result<PollSummary> {
        match (&mut self.task).await {
            Ok(summary) => Ok(summary),
            Err(err) if err.is_cancelled() => Ok(summarize(
                &self.session,
                &self.stats,
                StopReason::Cancelled,
            )),
            Err(err) => Err(err).context("poll loop task failed"),
        }
    }
}
