use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use issuemap_common::{Category, CategorySet, EngineConfig, GeoBounds, GeoPoint, StoreConfig, Viewport};
use issuemap_engine::render::{map_provider_key, render_mode, visible_reports, RenderMode};
use issuemap_engine::{CycleReport, Snapshot, ViewportController};
use issuemap_store::{DocumentStore, FirestoreConfig, FirestoreStore, MemoryStore};

#[derive(Parser)]
#[command(name = "issuemap", about = "Fetch civic issue reports for a map viewport")]
struct Cli {
    /// Engine config TOML; defaults plus ISSUEMAP_* env vars when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Read issues from a JSON fixture instead of Firestore
    #[arg(long)]
    fixture: Option<PathBuf>,

    /// Viewport center latitude (defaults to the configured center)
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Viewport center longitude
    #[arg(long, allow_hyphen_values = true)]
    lng: Option<f64>,

    /// North-east corner latitude
    #[arg(long, allow_hyphen_values = true)]
    ne_lat: Option<f64>,

    /// North-east corner longitude
    #[arg(long, allow_hyphen_values = true)]
    ne_lng: Option<f64>,

    /// Half the viewport height/width in degrees when no corner is given
    #[arg(long, default_value_t = 0.02)]
    span: f64,

    #[arg(long)]
    zoom: Option<u8>,

    /// Restrict to these categories (repeatable)
    #[arg(long = "category")]
    categories: Vec<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Serialize)]
struct Output {
    viewport: Viewport,
    render_mode: RenderMode,
    map_available: bool,
    visible: usize,
    cycle: CycleReport,
    snapshot: Snapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("issuemap=info".parse()?);
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env()?,
    };

    let store_config = StoreConfig::from_env();
    let store: Arc<dyn DocumentStore> = match &cli.fixture {
        Some(path) => {
            info!(fixture = %path.display(), "Using fixture store");
            Arc::new(
                MemoryStore::load_fixture(path)
                    .with_context(|| format!("Failed to load fixture {}", path.display()))?,
            )
        }
        None => Arc::new(FirestoreStore::new(FirestoreConfig::from_store_config(
            &store_config,
        )?)),
    };

    let map_available = match map_provider_key(&store_config) {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "Map rendering unavailable");
            false
        }
    };

    let viewport = viewport_from_args(&cli, &config);
    let filters: CategorySet = if cli.categories.is_empty() {
        CategorySet::all()
    } else {
        cli.categories.iter().map(|c| Category::parse(c)).collect()
    };

    let threshold = config.heatmap_zoom_threshold;
    let controller = ViewportController::new(store, config);
    controller.set_filters(filters.clone()).await;

    let cycle = controller.settle(viewport).await;
    let snapshot = controller.snapshot().await;

    let output = Output {
        viewport,
        render_mode: render_mode(viewport.zoom, threshold),
        map_available,
        visible: visible_reports(&snapshot.reports, &filters).len(),
        cycle,
        snapshot,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn viewport_from_args(cli: &Cli, config: &EngineConfig) -> Viewport {
    let center = GeoPoint::new(
        cli.lat.unwrap_or(config.default_center.lat),
        cli.lng.unwrap_or(config.default_center.lng),
    );
    let zoom = cli.zoom.unwrap_or(config.default_zoom);

    match (cli.ne_lat, cli.ne_lng) {
        (Some(lat), Some(lng)) => {
            let north_east = GeoPoint::new(lat, lng);
            let south_west = GeoPoint::new(
                2.0 * center.lat - north_east.lat,
                2.0 * center.lng - north_east.lng,
            );
            Viewport::new(center, GeoBounds::new(north_east, south_west), zoom)
        }
        _ => Viewport::around(center, cli.span, cli.span, zoom),
    }
}
