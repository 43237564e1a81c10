use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::error::{IssueMapError, Result};
use crate::types::GeoPoint;

/// Tunables for the acquisition engine.
///
/// Defaults match the production map; every field can be overridden from a
/// TOML file (`EngineConfig::load`) and then from `ISSUEMAP_*` env vars.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Scales the center-to-corner distance (km) into the query radius (m).
    pub fetch_radius_multiplier: f64,
    /// Minimum credibility (inclusive) for an issue to have its reports pulled.
    pub min_credibility: f64,
    /// Zoom above which the renderer switches from heatmap to markers.
    pub heatmap_zoom_threshold: u8,
    pub debounce_ms: u64,
    pub geolocation_timeout_ms: u64,
    /// Location fixes older than this are ignored.
    pub geolocation_max_age_ms: u64,
    /// A new fix farther than this from the reference location resets acquisition.
    pub relocate_threshold_m: f64,
    pub default_center: GeoPoint,
    pub default_zoom: u8,
    pub zoom_with_location: u8,
    pub recenter_zoom: u8,
    pub range_query_concurrency: usize,
    pub report_fetch_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_radius_multiplier: 1000.0,
            min_credibility: 0.5,
            heatmap_zoom_threshold: 16,
            debounce_ms: 300,
            geolocation_timeout_ms: 10_000,
            geolocation_max_age_ms: 300_000,
            relocate_threshold_m: 100.0,
            default_center: GeoPoint::new(12.9716, 77.5946),
            default_zoom: 12,
            zoom_with_location: 14,
            recenter_zoom: 18,
            range_query_concurrency: 8,
            report_fetch_concurrency: 10,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        override_env("ISSUEMAP_FETCH_RADIUS_MULTIPLIER", &mut self.fetch_radius_multiplier)?;
        override_env("ISSUEMAP_MIN_CREDIBILITY", &mut self.min_credibility)?;
        override_env("ISSUEMAP_HEATMAP_ZOOM_THRESHOLD", &mut self.heatmap_zoom_threshold)?;
        override_env("ISSUEMAP_DEBOUNCE_MS", &mut self.debounce_ms)?;
        override_env("ISSUEMAP_GEOLOCATION_TIMEOUT_MS", &mut self.geolocation_timeout_ms)?;
        override_env("ISSUEMAP_GEOLOCATION_MAX_AGE_MS", &mut self.geolocation_max_age_ms)?;
        override_env("ISSUEMAP_RELOCATE_THRESHOLD_M", &mut self.relocate_threshold_m)?;
        override_env("ISSUEMAP_DEFAULT_LAT", &mut self.default_center.lat)?;
        override_env("ISSUEMAP_DEFAULT_LNG", &mut self.default_center.lng)?;
        override_env("ISSUEMAP_RANGE_QUERY_CONCURRENCY", &mut self.range_query_concurrency)?;
        override_env("ISSUEMAP_REPORT_FETCH_CONCURRENCY", &mut self.report_fetch_concurrency)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_credibility) {
            return Err(IssueMapError::Config(format!(
                "min_credibility must be within [0, 1], got {}",
                self.min_credibility
            )));
        }
        if !(self.fetch_radius_multiplier.is_finite() && self.fetch_radius_multiplier > 0.0) {
            return Err(IssueMapError::Config(format!(
                "fetch_radius_multiplier must be positive, got {}",
                self.fetch_radius_multiplier
            )));
        }
        if !self.default_center.is_valid() {
            return Err(IssueMapError::InvalidLocation {
                lat: self.default_center.lat,
                lng: self.default_center.lng,
            });
        }
        if self.range_query_concurrency == 0 || self.report_fetch_concurrency == 0 {
            return Err(IssueMapError::Config(
                "concurrency limits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn geolocation_timeout(&self) -> Duration {
        Duration::from_millis(self.geolocation_timeout_ms)
    }

    pub fn geolocation_max_age(&self) -> Duration {
        Duration::from_millis(self.geolocation_max_age_ms)
    }
}

/// Connection settings for the document store and the map provider.
/// Secrets only; loaded from the environment.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub firestore_project_id: Option<String>,
    pub firestore_database: String,
    pub firestore_api_key: Option<String>,
    pub firestore_bearer_token: Option<String>,
    pub map_api_key: Option<String>,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let config = Self {
            firestore_project_id: optional_env("FIRESTORE_PROJECT_ID"),
            firestore_database: optional_env("FIRESTORE_DATABASE")
                .unwrap_or_else(|| "(default)".to_string()),
            firestore_api_key: optional_env("FIRESTORE_API_KEY"),
            firestore_bearer_token: optional_env("FIRESTORE_BEARER_TOKEN"),
            map_api_key: optional_env("MAP_API_KEY"),
        };

        config.log_redacted();
        config
    }

    pub fn log_redacted(&self) {
        fn preview(val: &str) -> String {
            let n = val.char_indices().nth(5).map(|(i, _)| i).unwrap_or(val.len());
            format!("{}...({} chars)", &val[..n], val.len())
        }
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => preview(v),
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Store config loaded:");
        tracing::info!(
            "  FIRESTORE_PROJECT_ID: {}",
            self.firestore_project_id.as_deref().unwrap_or("<not set>")
        );
        tracing::info!("  FIRESTORE_DATABASE: {}", self.firestore_database);
        tracing::info!("  FIRESTORE_API_KEY: {}", preview_opt(&self.firestore_api_key));
        tracing::info!(
            "  FIRESTORE_BEARER_TOKEN: {}",
            preview_opt(&self.firestore_bearer_token)
        );
        tracing::info!("  MAP_API_KEY: {}", preview_opt(&self.map_api_key));
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn override_env<T>(key: &str, slot: &mut T) -> Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = optional_env(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| IssueMapError::Config(format!("{key}={raw}: {e}")))?;
    }
    Ok(())
}
