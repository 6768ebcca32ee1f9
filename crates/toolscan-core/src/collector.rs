use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, instrument, warn};

use crate::api::ScanBackend;
use crate::error::ScanError;
use crate::model::{Report, ReportId};

#[derive(Debug)]
enum Slot {
    InFlight,
    Resolved(Arc<Report>),
}

/// Outcome of asking the collector for a report.
#[derive(Debug, Clone)]
pub enum Fetch {
    /// First retrieval in this session; the caller should render it.
    Fresh(Arc<Report>),
    /// Already retrieved earlier; nothing new to show.
    Cached(Arc<Report>),
    /// Another caller is retrieving it right now.
    InFlight,
}

impl Fetch {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }
}

/// Fetch-once cache of compliance reports for one scan session.
#[derive(Debug, Default)]
pub struct ReportCollector {
    slots: Mutex<HashMap<ReportId, Slot>>,
}

impl ReportCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ReportId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retrieve `report_id` unless it is already resolved or being retrieved.
    ///
    /// The in-flight marker is placed before the request goes out, so a
    /// concurrent caller sees [`Fetch::InFlight`] instead of issuing a second
    /// request. A failed or cancelled request clears the marker and may be
    /// retried.
    #[instrument(level = "debug", skip(self, backend), fields(report = %report_id))]
    pub async fn fetch_once<B>(&self, backend: &B, report_id: ReportId) -> Result<Fetch, ScanError>
    where
        B: ScanBackend + ?Sized,
    {
        {
            let mut slots = self.slots();
            match slots.get(&report_id) {
                Some(Slot::Resolved(report)) => return Ok(Fetch::Cached(Arc::clone(report))),
                Some(Slot::InFlight) => return Ok(Fetch::InFlight),
                None => {
                    slots.insert(report_id, Slot::InFlight);
                }
            }
        }

        let mut marker = InFlightMarker {
            collector: self,
            report_id,
            armed: true,
        };
        match backend.fetch_report(report_id).await {
            Ok(report) => {
                let report = Arc::new(report);
                self.slots()
                    .insert(report_id, Slot::Resolved(Arc::clone(&report)));
                marker.armed = false;
                debug!(tool = report.tool_name(), "report collected");
                Ok(Fetch::Fresh(report))
            }
            Err(err) => {
                warn!(error = %err, "report fetch failed; will retry");
                Err(err)
            }
        }
    }

    pub fn get(&self, report_id: ReportId) -> Option<Arc<Report>> {
        match self.slots().get(&report_id) {
            Some(Slot::Resolved(report)) => Some(Arc::clone(report)),
            _ => None,
        }
    }

    pub fn is_resolved(&self, report_id: ReportId) -> bool {
        matches!(self.slots().get(&report_id), Some(Slot::Resolved(_)))
    }

    /// Number of reports retrieved so far.
    pub fn resolved_count(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Resolved(_)))
            .count()
    }

    pub fn clear(&self) {
        self.slots().clear();
    }
}

/// Removes an `InFlight` slot when the fetch that placed it does not
/// resolve, including when its future is dropped mid-request.
struct InFlightMarker<'a> {
    collector: &'a ReportCollector,
    report_id: ReportId,
    armed: bool,
}

impl Drop for InFlightMarker<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.collector.slots();
        if matches!(slots.get(&self.report_id), Some(Slot::InFlight)) {
            slots.remove(&self.report_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, Op};
    use serde_json::Value;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn second_request_is_served_from_cache() {
        let backend = FakeBackend::new();
        backend.add_report(5, "Figma", Value::Null);
        let collector = ReportCollector::new();

        let first = collector.fetch_once(&backend, ReportId(5)).await.unwrap();
        let second = collector.fetch_once(&backend, ReportId(5)).await.unwrap();

        assert!(first.is_fresh());
        assert!(matches!(second, Fetch::Cached(ref report) if report.tool_name() == "Figma"));
        assert_eq!(backend.calls(Op::Report), 1);
        assert_eq!(collector.resolved_count(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_can_be_retried() {
        let backend = FakeBackend::new();
        backend.add_report(8, "Jira", Value::Null);
        backend.fail_next(Op::Report, 1);
        let collector = ReportCollector::new();

        let err = collector.fetch_once(&backend, ReportId(8)).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!collector.is_resolved(ReportId(8)));

        let retry = collector.fetch_once(&backend, ReportId(8)).await.unwrap();
        assert!(retry.is_fresh());
        assert!(collector.get(ReportId(8)).is_some());
        assert_eq!(backend.calls(Op::Report), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_see_in_flight_marker() {
        let gate = Arc::new(Notify::new());
        let backend = FakeBackend::with_report_gate(Arc::clone(&gate));
        backend.add_report(2, "Slack", Value::Null);
        let collector = ReportCollector::new();

        let first = collector.fetch_once(&backend, ReportId(2));
        let second = async {
            tokio::task::yield_now().await;
            let outcome = collector.fetch_once(&backend, ReportId(2)).await;
            gate.notify_one();
            outcome
        };
        let (first, second) = tokio::join!(first, second);

        assert!(first.unwrap().is_fresh());
        assert!(matches!(second.unwrap(), Fetch::InFlight));
        assert_eq!(backend.calls(Op::Report), 1);
    }

    #[tokio::test]
    async fn cancelled_fetch_can_be_retried() {
        let gate = Arc::new(Notify::new());
        let backend = FakeBackend::with_report_gate(Arc::clone(&gate));
        backend.add_report(4, "Notion", Value::Null);
        let collector = ReportCollector::new();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            collector.fetch_once(&backend, ReportId(4)),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(!collector.is_resolved(ReportId(4)));

        gate.notify_one();
        let retry = collector.fetch_once(&backend, ReportId(4)).await.unwrap();
        assert!(retry.is_fresh());
        assert_eq!(backend.calls(Op::Report), 2);
    }

    #[test]
    fn clear_forgets_resolved_reports() {
        let collector = ReportCollector::new();
        collector.slots().insert(ReportId(1), Slot::InFlight);
        assert!(!collector.is_resolved(ReportId(1)));
        collector.clear();
        assert_eq!(collector.resolved_count(), 0);
        assert!(collector.get(ReportId(1)).is_none());
    }
}
