use thiserror::Error;

/// Result type alias for issuemap operations.
pub type Result<T> = std::result::Result<T, IssueMapError>;

#[derive(Error, Debug)]
pub enum IssueMapError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid location: lat={lat} lng={lng}")]
    InvalidLocation { lat: f64, lng: f64 },

    #[error("Invalid query radius: {0} meters")]
    InvalidRadius(f64),

    #[error("Spatial key encoding failed: {0}")]
    SpatialKey(String),

    #[error("Map provider key is missing; map rendering is unavailable")]
    MissingMapKey,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
