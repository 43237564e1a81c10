//! Incremental geospatial acquisition for the civic issue map.
//!
//! A settled viewport is split into geohash ranges, ranges already fetched
//! at that zoom are skipped, the rest are queried in parallel, credible open
//! issues are admitted once, and their reports are merged into a
//! deduplicated working set for the renderer.

pub mod aggregate;
pub mod controller;
pub mod cycle;
pub mod dedup;
pub mod fetcher;
pub mod partition;
pub mod quality;
pub mod render;
pub mod working_set;

pub use controller::{ControllerHandle, ControllerState, Snapshot, ViewportController, ViewportEvent};
pub use cycle::{run_cycle, AcquisitionState, CycleOutcome, CycleReport};
pub use partition::{covering_ranges, Partition};
pub use render::{render_mode, MarkerIconCache, RenderMode};
pub use working_set::WorkingReportSet;
