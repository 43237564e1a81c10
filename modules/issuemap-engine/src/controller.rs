//! Viewport controller: drives fetch cycles from map and location events.
//!
//! Holds the acquisition state for one map session, lets at most one cycle
//! run at a time and resets everything when the user's location moves
//! materially. `spawn` wires it to an event channel with settle debouncing
//! and the initial wait for a location fix.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info};

use issuemap_common::{
    haversine_meters, CategorySet, EngineConfig, GeoPoint, LocationFix, Report, Viewport,
};
use issuemap_store::DocumentStore;

use crate::cycle::{run_cycle, AcquisitionState, CycleReport};

/// Capacity of the event channel handed out by `spawn`.
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    FetchInFlight,
    ResetPending,
}

/// Inputs from the map provider, the device location and the filter UI.
#[derive(Debug, Clone)]
pub enum ViewportEvent {
    /// Pan or zoom finished.
    Settled(Viewport),
    /// Center moved; tracked but does not fetch on its own.
    CenterChanged(Viewport),
    /// Map container resized; treated like a settle.
    Resized(Viewport),
    LocationFix(LocationFix),
    LocationUnavailable,
    FiltersChanged(CategorySet),
}

/// Point-in-time view of the controller for the render surface.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub generation: u64,
    pub state: ControllerState,
    pub filters: CategorySet,
    pub reports: Vec<Report>,
}

pub struct ViewportController<S> {
    store: S,
    config: EngineConfig,
    state: Mutex<AcquisitionState>,
    /// Mirror of the state's generation, readable without the state lock so a
    /// cycle can be stamped the moment it starts.
    generation: AtomicU64,
    cycle_lock: Mutex<()>,
    status: watch::Sender<ControllerState>,
}

/// Marks the controller busy for the lifetime of one cycle.
struct InFlight<'a> {
    _cycle: MutexGuard<'a, ()>,
    status: &'a watch::Sender<ControllerState>,
}

impl<'a> InFlight<'a> {
    fn enter(cycle: MutexGuard<'a, ()>, status: &'a watch::Sender<ControllerState>) -> Self {
        status.send_replace(ControllerState::FetchInFlight);
        Self {
            _cycle: cycle,
            status,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        // A reset requested meanwhile keeps its ResetPending state.
        self.status.send_if_modified(|state| {
            if *state == ControllerState::FetchInFlight {
                *state = ControllerState::Idle;
                true
            } else {
                false
            }
        });
    }
}

impl<S> ViewportController<S>
where
    S: DocumentStore + 'static,
{
    pub fn new(store: S, config: EngineConfig) -> Self {
        let (status, _) = watch::channel(ControllerState::Idle);
        Self {
            store,
            config,
            state: Mutex::new(AcquisitionState::new()),
            generation: AtomicU64::new(0),
            cycle_lock: Mutex::new(()),
            status,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a cycle for a settled viewport, unless one is already in flight,
    /// in which case the settle is dropped.
    pub async fn settle(&self, viewport: Viewport) -> CycleReport {
        let Ok(cycle) = self.cycle_lock.try_lock() else {
            debug!(zoom = viewport.zoom, "Cycle in flight, dropping settle");
            return CycleReport::dropped(viewport.zoom);
        };
        let _in_flight = InFlight::enter(cycle, &self.status);
        let generation = self.generation.load(Ordering::SeqCst);
        run_cycle(&self.store, &self.config, &self.state, generation, viewport).await
    }

    /// Clear all acquisition state and cancel the running cycle, if any.
    pub async fn reset(&self) -> u64 {
        let generation = {
            let mut state = self.state.lock().await;
            let generation = state.reset();
            self.generation.store(generation, Ordering::SeqCst);
            generation
        };
        self.status.send_replace(ControllerState::ResetPending);
        info!(generation, "Acquisition state reset");
        generation
    }

    /// Reset, wait for any stale cycle to wind down, then fetch `viewport`
    /// from a cold start.
    pub async fn relocate(&self, viewport: Viewport) -> CycleReport {
        let generation = self.reset().await;
        let cycle = self.cycle_lock.lock().await;
        let _in_flight = InFlight::enter(cycle, &self.status);
        run_cycle(&self.store, &self.config, &self.state, generation, viewport).await
    }

    /// Replace the category filter used by later cycles. Partitions already
    /// fetched are not requested again.
    pub async fn set_filters(&self, filters: CategorySet) {
        debug!(selected = filters.len(), "Category filters changed");
        self.state.lock().await.filters = filters;
    }

    pub fn state(&self) -> ControllerState {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.status.subscribe()
    }

    pub async fn reports(&self) -> Vec<Report> {
        self.state.lock().await.working_set.reports().to_vec()
    }

    pub async fn snapshot(&self) -> Snapshot {
        let state = self.state.lock().await;
        Snapshot {
            generation: state.generation,
            state: self.state(),
            filters: state.filters.clone(),
            reports: state.working_set.reports().to_vec(),
        }
    }

    /// Viewport for "recenter on me": the user's position at the close-up
    /// zoom. The map reports it back as a settle, which drives the fetch.
    pub fn recenter_viewport(&self, current: Viewport, user: GeoPoint) -> Viewport {
        current.recentered(user).with_zoom(self.config.recenter_zoom)
    }

    /// Whether a fix is recent enough to act on.
    fn is_fresh(&self, fix: &LocationFix) -> bool {
        fix.age(Utc::now()) <= self.config.geolocation_max_age()
    }

    /// Start the event loop. Events go through the returned handle; dropping
    /// or shutting down the handle ends the loop after in-flight cycles finish.
    pub fn spawn(self: Arc<Self>) -> ControllerHandle {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let task = tokio::spawn(self.run_events(rx));
        ControllerHandle { tx, task }
    }

    async fn run_events(self: Arc<Self>, mut rx: mpsc::Receiver<ViewportEvent>) {
        let mut cycles = JoinSet::new();

        if let Some(session) = self.wait_for_initial(&mut rx).await {
            let this = self.clone();
            let viewport = session.viewport;
            cycles.spawn(async move {
                this.settle(viewport).await;
            });
            Self::debounce_events(&self, &mut rx, &mut cycles, session).await;
        }

        while cycles.join_next().await.is_some() {}
        debug!("Viewport event loop stopped");
    }

    /// Wait for a fix, an explicit "unavailable" or the geolocation timeout,
    /// and for the map to report a viewport. Returns `None` if the channel
    /// closes first.
    async fn wait_for_initial(
        &self,
        rx: &mut mpsc::Receiver<ViewportEvent>,
    ) -> Option<InitialSession> {
        let deadline = Instant::now() + self.config.geolocation_timeout();
        let mut viewport: Option<Viewport> = None;
        let mut fix: Option<LocationFix> = None;
        let mut resolved = false;

        loop {
            if resolved && viewport.is_some() {
                break;
            }

            let event = if resolved {
                rx.recv().await
            } else {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(event) => event,
                    Err(_) => {
                        info!("Geolocation timed out, using map center");
                        resolved = true;
                        continue;
                    }
                }
            };

            match event? {
                ViewportEvent::Settled(v)
                | ViewportEvent::CenterChanged(v)
                | ViewportEvent::Resized(v) => viewport = Some(v),
                ViewportEvent::LocationFix(f) if self.is_fresh(&f) => {
                    fix = Some(f);
                    resolved = true;
                }
                ViewportEvent::LocationFix(_) => debug!("Ignoring stale location fix"),
                ViewportEvent::LocationUnavailable => {
                    info!("Location unavailable, using map center");
                    resolved = true;
                }
                ViewportEvent::FiltersChanged(filters) => self.set_filters(filters).await,
            }
        }

        let viewport = viewport?;
        Some(match fix {
            Some(fix) => InitialSession {
                viewport: viewport
                    .recentered(fix.point)
                    .with_zoom(self.config.zoom_with_location),
                reference: Some(fix.point),
            },
            None => InitialSession {
                viewport,
                reference: None,
            },
        })
    }

    /// Collapse bursts of settles into one cycle per quiet period, and turn
    /// material location changes into relocations.
    async fn debounce_events(
        this: &Arc<Self>,
        rx: &mut mpsc::Receiver<ViewportEvent>,
        cycles: &mut JoinSet<()>,
        session: InitialSession,
    ) {
        let quiet_period = this.config.debounce();
        let mut last_viewport = session.viewport;
        let mut reference = session.reference;
        let mut pending: Option<(Viewport, Instant)> = None;

        loop {
            let event = match pending {
                Some((viewport, deadline)) => {
                    match tokio::time::timeout_at(deadline, rx.recv()).await {
                        Ok(event) => event,
                        Err(_) => {
                            pending = None;
                            let this = Arc::clone(this);
                            cycles.spawn(async move {
                                this.settle(viewport).await;
                            });
                            continue;
                        }
                    }
                }
                None => rx.recv().await,
            };

            // Reap finished cycles so the set does not grow unbounded.
            while cycles.try_join_next().is_some() {}

            let Some(event) = event else {
                break;
            };

            match event {
                ViewportEvent::Settled(v) | ViewportEvent::Resized(v) => {
                    last_viewport = v;
                    pending = Some((v, Instant::now() + quiet_period));
                }
                ViewportEvent::CenterChanged(v) => last_viewport = v,
                ViewportEvent::LocationFix(fix) => {
                    if !this.is_fresh(&fix) {
                        debug!("Ignoring stale location fix");
                        continue;
                    }
                    if let Some(previous) = reference {
                        let moved = haversine_meters(previous, fix.point);
                        if moved <= this.config.relocate_threshold_m {
                            debug!(moved_m = moved, "Location change below threshold");
                            continue;
                        }
                    }
                    reference = Some(fix.point);
                    let base = pending.take().map_or(last_viewport, |(v, _)| v);
                    let viewport = base.recentered(fix.point);
                    info!(lat = fix.point.lat, lng = fix.point.lng, "Material relocation");
                    let this = Arc::clone(this);
                    cycles.spawn(async move {
                        this.relocate(viewport).await;
                    });
                }
                ViewportEvent::LocationUnavailable => debug!("Location unavailable"),
                ViewportEvent::FiltersChanged(filters) => this.set_filters(filters).await,
            }
        }

        // Flush a settle still waiting out its quiet period.
        if let Some((viewport, _)) = pending {
            let this = Arc::clone(this);
            cycles.spawn(async move {
                this.settle(viewport).await;
            });
        }
    }
}

struct InitialSession {
    viewport: Viewport,
    reference: Option<GeoPoint>,
}

/// Sending side of a spawned controller's event loop.
pub struct ControllerHandle {
    tx: mpsc::Sender<ViewportEvent>,
    task: JoinHandle<()>,
}

impl ControllerHandle {
    /// Queue an event. Returns false once the loop has stopped.
    pub async fn send(&self, event: ViewportEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Close the event channel and wait for the loop and its cycles to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use issuemap_store::MemoryStore;

    #[test]
    fn recenter_uses_close_up_zoom() {
        let controller = ViewportController::new(MemoryStore::new(), EngineConfig::default());
        let current = Viewport::around(GeoPoint::new(12.9716, 77.5946), 0.01, 0.01, 12);
        let me = GeoPoint::new(13.0, 77.6);

        let v = controller.recenter_viewport(current, me);
        assert_eq!(v.center, me);
        assert_eq!(v.zoom, 18);
    }

    #[tokio::test]
    async fn reset_marks_reset_pending_until_next_cycle() {
        let controller = ViewportController::new(MemoryStore::new(), EngineConfig::default());
        assert_eq!(controller.state(), ControllerState::Idle);

        assert_eq!(controller.reset().await, 1);
        assert_eq!(controller.state(), ControllerState::ResetPending);

        let viewport = Viewport::around(GeoPoint::new(12.9716, 77.5946), 0.01, 0.01, 12);
        let report = controller.settle(viewport).await;
        assert_eq!(report.generation, 1);
        assert_eq!(report.outcome, crate::cycle::CycleOutcome::Completed);
        assert_eq!(controller.state(), ControllerState::Idle);
    }
}
