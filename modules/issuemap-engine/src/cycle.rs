//! One acquisition cycle: partition the viewport, claim unseen partitions,
//! query them, admit issues, aggregate their reports and merge the result.
//!
//! Every cycle is stamped with the acquisition generation it started under.
//! A relocation reset bumps the generation and cancels the generation's
//! token; a cycle from an older generation stops at its next checkpoint and
//! never touches the seen-sets or the working set again.

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use issuemap_common::{fetch_radius, CategorySet, EngineConfig, Viewport};
use issuemap_store::DocumentStore;

use crate::aggregate::aggregate_reports;
use crate::dedup::PartitionLedger;
use crate::fetcher::fetch_issues;
use crate::partition::covering_ranges;
use crate::quality::IssueLedger;
use crate::working_set::WorkingReportSet;

/// Acquisition state owned by one controller.
#[derive(Debug)]
pub struct AcquisitionState {
    pub generation: u64,
    pub partitions: PartitionLedger,
    pub issues: IssueLedger,
    pub working_set: WorkingReportSet,
    /// Active category filter; survives resets.
    pub filters: CategorySet,
    cancel: CancellationToken,
}

impl AcquisitionState {
    pub fn new() -> Self {
        Self {
            generation: 0,
            partitions: PartitionLedger::new(),
            issues: IssueLedger::new(),
            working_set: WorkingReportSet::new(),
            filters: CategorySet::all(),
            cancel: CancellationToken::new(),
        }
    }

    /// Clear the partition ledger, issue ledger and working set together,
    /// cancel the current generation and start the next one.
    pub fn reset(&mut self) -> u64 {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.partitions.clear();
        self.issues.clear();
        self.working_set.clear();
        self.generation += 1;
        self.generation
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Default for AcquisitionState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Store calls were made and their results merged.
    Completed,
    /// Every partition had been requested already; no store calls.
    #[default]
    NothingNew,
    /// A reset happened while the cycle was running; its results were thrown away.
    Discarded,
    /// Another cycle was in flight; this settle was ignored.
    Dropped,
    /// The viewport could not be partitioned.
    Rejected,
}

/// Summary of one cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub generation: u64,
    pub zoom: u8,
    pub radius_m: f64,
    pub partitions_requested: usize,
    pub partitions_failed: usize,
    pub issues_fetched: usize,
    pub issues_admitted: usize,
    pub issues_failed: usize,
    pub reports_added: usize,
    pub reports_dropped: usize,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    pub fn dropped(zoom: u8) -> Self {
        Self {
            zoom,
            outcome: CycleOutcome::Dropped,
            ..Default::default()
        }
    }

    fn discarded(mut self) -> Self {
        self.outcome = CycleOutcome::Discarded;
        info!(generation = self.generation, "Stale cycle discarded");
        self
    }
}

/// Run one cycle for `viewport` against `store`.
///
/// `generation` is the acquisition generation observed when the cycle was
/// started; if a reset has happened since, the cycle is discarded before it
/// claims anything.
///
/// Never fails: partition and report read errors are logged and degrade
/// to fewer results. The caller is responsible for ensuring only one cycle
/// runs at a time.
pub async fn run_cycle<S>(
    store: &S,
    config: &EngineConfig,
    state: &Mutex<AcquisitionState>,
    generation: u64,
    viewport: Viewport,
) -> CycleReport
where
    S: DocumentStore + ?Sized,
{
    let radius_m = fetch_radius(
        viewport.center,
        viewport.bounds.north_east,
        config.fetch_radius_multiplier,
    );
    let mut report = CycleReport {
        generation,
        zoom: viewport.zoom,
        radius_m,
        ..Default::default()
    };

    let candidates = match covering_ranges(viewport.center, radius_m) {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!(error = %e, "Cannot partition viewport, skipping cycle");
            report.outcome = CycleOutcome::Rejected;
            return report;
        }
    };

    // Claim unseen partitions in one critical section.
    let (cancel, filters, partitions) = {
        let mut state = state.lock().await;
        if state.generation != generation {
            return report.discarded();
        }
        let partitions = state.partitions.claim(viewport.zoom, candidates);
        (state.cancellation(), state.filters.clone(), partitions)
    };
    report.partitions_requested = partitions.len();

    if partitions.is_empty() {
        debug!(zoom = viewport.zoom, "All partitions already fetched");
        report.outcome = CycleOutcome::NothingNew;
        return report;
    }

    let fetched = tokio::select! {
        _ = cancel.cancelled() => return report.discarded(),
        fetched = fetch_issues(store, &partitions, &filters, config.range_query_concurrency) => fetched,
    };
    report.partitions_failed = fetched.failed.len();
    report.issues_fetched = fetched.issues.len();

    let admitted = {
        let mut state = state.lock().await;
        if state.generation != generation {
            return report.discarded();
        }
        state.issues.admit(fetched.issues, config.min_credibility)
    };
    report.issues_admitted = admitted.len();

    let aggregation = tokio::select! {
        _ = cancel.cancelled() => return report.discarded(),
        aggregation = aggregate_reports(store, &admitted, config.report_fetch_concurrency) => aggregation,
    };
    report.issues_failed = aggregation.failed.len();
    report.reports_dropped = aggregation.dropped;

    {
        let mut state = state.lock().await;
        if state.generation != generation {
            return report.discarded();
        }
        for issue_id in &aggregation.failed {
            state.issues.revert(issue_id);
        }
        report.reports_added = state.working_set.merge(aggregation.reports);
    }

    report.outcome = CycleOutcome::Completed;
    info!(
        generation,
        zoom = report.zoom,
        partitions = report.partitions_requested,
        partitions_failed = report.partitions_failed,
        issues = report.issues_fetched,
        admitted = report.issues_admitted,
        reports_added = report.reports_added,
        "Fetch cycle complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use issuemap_common::GeoPoint;
    use issuemap_store::{Document, MemoryStore};
    use serde_json::json;

    const CENTER: GeoPoint = GeoPoint::new(12.9716, 77.5946);

    fn viewport() -> Viewport {
        Viewport::around(CENTER, 0.01, 0.01, 14)
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        let key = crate::partition::encode(CENTER, 9).unwrap();
        store.insert_issue(Document::from_json(
            "A",
            json!({"geohash": key, "credibility": 0.6, "status": "open", "category": "water",
                   "normalizedHeatScore": 0.4}),
        ));
        store.insert_report(
            "A",
            Document::from_json("r1", json!({"addedAt": "2024-05-01T10:00:00Z", "lat": 12.97, "lng": 77.59})),
        );
        store
    }

    #[tokio::test]
    async fn cycle_merges_reports_then_finds_nothing_new() {
        let store = seeded_store();
        let state = Mutex::new(AcquisitionState::new());
        let config = EngineConfig::default();

        let first = run_cycle(&store, &config, &state, 0, viewport()).await;
        assert_eq!(first.outcome, CycleOutcome::Completed);
        assert_eq!(first.reports_added, 1);
        assert!(first.partitions_requested > 0);

        let calls = store.range_calls().len();
        let second = run_cycle(&store, &config, &state, 0, viewport()).await;
        assert_eq!(second.outcome, CycleOutcome::NothingNew);
        assert_eq!(store.range_calls().len(), calls);
        assert_eq!(state.lock().await.working_set.len(), 1);
    }

    #[tokio::test]
    async fn reset_clears_all_sets_and_bumps_generation() {
        let store = seeded_store();
        let state = Mutex::new(AcquisitionState::new());
        run_cycle(&store, &EngineConfig::default(), &state, 0, viewport()).await;

        let mut guard = state.lock().await;
        let old_token = guard.cancellation();
        assert_eq!(guard.reset(), 1);
        assert!(old_token.is_cancelled());
        assert!(guard.partitions.is_empty());
        assert!(guard.issues.is_empty());
        assert!(guard.working_set.is_empty());
        assert!(!guard.cancellation().is_cancelled());
    }

    #[tokio::test]
    async fn stale_generation_never_merges() {
        let store = std::sync::Arc::new(seeded_store());
        store.close_reports();
        let state = std::sync::Arc::new(Mutex::new(AcquisitionState::new()));

        let cycle = {
            let store = store.clone();
            let state = state.clone();
            tokio::spawn(async move {
                run_cycle(&*store, &EngineConfig::default(), &state, 0, viewport()).await
            })
        };

        // Wait until the cycle is blocked reading reports, then bump the
        // generation without cancelling the token.
        while store.report_calls().is_empty() {
            tokio::task::yield_now().await;
        }
        {
            let mut guard = state.lock().await;
            guard.generation += 1;
        }
        store.open_reports();

        let report = cycle.await.unwrap();
        assert_eq!(report.outcome, CycleOutcome::Discarded);
        assert!(state.lock().await.working_set.is_empty());
    }

    #[tokio::test]
    async fn cycle_started_before_reset_is_discarded_at_claim() {
        let store = std::sync::Arc::new(seeded_store());
        let state = std::sync::Arc::new(Mutex::new(AcquisitionState::new()));

        // The cycle starts under generation 0 but cannot take the state lock
        // until a reset has moved on to generation 1.
        let mut guard = state.lock().await;
        let cycle = {
            let store = store.clone();
            let state = state.clone();
            tokio::spawn(async move {
                run_cycle(&*store, &EngineConfig::default(), &state, 0, viewport()).await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(guard.reset(), 1);
        drop(guard);

        let report = cycle.await.unwrap();
        assert_eq!(report.outcome, CycleOutcome::Discarded);
        assert_eq!(report.generation, 0);
        assert!(store.range_calls().is_empty());

        let state = state.lock().await;
        assert!(state.partitions.is_empty());
        assert!(state.working_set.is_empty());
    }

    #[test]
    fn cycle_future_can_be_spawned() {
        fn assert_send<T: Send>(_: &T) {}

        let store = MemoryStore::new();
        let state = Mutex::new(AcquisitionState::new());
        let config = EngineConfig::default();
        let cycle = run_cycle(&store, &config, &state, 0, viewport());
        assert_send(&cycle);
    }

    #[tokio::test]
    async fn invalid_viewport_is_rejected_without_store_calls() {
        let store = MemoryStore::new();
        let state = Mutex::new(AcquisitionState::new());
        let bad = Viewport::around(GeoPoint::new(f64::NAN, 0.0), 0.01, 0.01, 12);

        let report = run_cycle(&store, &EngineConfig::default(), &state, 0, bad).await;
        assert_eq!(report.outcome, CycleOutcome::Rejected);
        assert!(store.range_calls().is_empty());
    }
}
