pub mod config;
pub mod error;
pub mod geo;
pub mod types;

pub use config::{EngineConfig, StoreConfig};
pub use error::{IssueMapError, Result};
pub use geo::*;
pub use types::*;
