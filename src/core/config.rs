//! Configuration for accessibility runs
//!
//! Values come from an optional TOML file and are then overridden by CLI
//! flags. Every field has a default, so an empty file is a valid config.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::error::{Error, Result};

/// Default tile side length in kilometers
pub const DEFAULT_TILE_SIZE_KM: f64 = 30.0;

/// Default initial search time budget (seconds)
pub const DEFAULT_MAX_TIME_SECS: f64 = 3600.0;

/// Default assumed top speed used to turn time budgets into distances (km/h)
pub const DEFAULT_MAX_SPEED_KMH: f64 = 120.0;

/// Minimum number of candidate facilities per category and tile
pub const DEFAULT_MIN_FACILITIES: usize = 4;

/// Buffer growth per search step (seconds)
pub const DEFAULT_BUFFER_STEP_SECS: f64 = 900.0;

/// Coordinates per table request accepted by a stock osrm-routed (`--max-table-size`)
pub const DEFAULT_MAX_TABLE_SIZE: usize = 100;

/// Tile concurrency is `num_cpus * CONCURRENCY_FACTOR` since tiles mostly wait on the engine
pub const CONCURRENCY_FACTOR: f64 = 1.5;

/// Default base delay for retry backoff (in milliseconds)
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Tile concurrency derived from the number of CPUs
pub fn default_concurrency() -> usize {
    ((num_cpus::get() as f64 * CONCURRENCY_FACTOR).floor() as usize).max(1)
}

/// Engine tuning: tiling, facility search and scheduling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tile side length in kilometers
    pub tile_size_km: f64,
    /// Initial search time budget in seconds
    pub max_time_secs: f64,
    /// Speed used to convert time budgets to buffer distances (km/h)
    pub max_speed_kmh: f64,
    /// Facilities wanted per category before querying travel times
    pub min_facilities: usize,
    /// Search budget growth per step in seconds
    pub buffer_step_secs: f64,
    /// Maximum number of tiles in flight
    pub concurrency: usize,
    /// Maximum number of concurrent queries against the routing engine
    pub engine_pool_size: usize,
    /// Retries for routing engine transport failures (0 = fail on first error)
    pub max_retries: u32,
    /// Base delay for exponential retry backoff
    pub retry_base_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tile_size_km: DEFAULT_TILE_SIZE_KM,
            max_time_secs: DEFAULT_MAX_TIME_SECS,
            max_speed_kmh: DEFAULT_MAX_SPEED_KMH,
            min_facilities: DEFAULT_MIN_FACILITIES,
            buffer_step_secs: DEFAULT_BUFFER_STEP_SECS,
            concurrency: default_concurrency(),
            engine_pool_size: 1,
            max_retries: 0,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        positive("engine.tile_size_km", self.tile_size_km)?;
        positive("engine.max_speed_kmh", self.max_speed_kmh)?;
        positive("engine.buffer_step_secs", self.buffer_step_secs)?;
        if !self.max_time_secs.is_finite() || self.max_time_secs < 0.0 {
            return Err(Error::Config(format!(
                "engine.max_time_secs must be a non-negative number, got {}",
                self.max_time_secs
            )));
        }
        if self.concurrency == 0 {
            return Err(Error::Config("engine.concurrency must be at least 1".to_string()));
        }
        if self.engine_pool_size == 0 {
            return Err(Error::Config("engine.engine_pool_size must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// Connection settings for an OSRM-compatible HTTP routing engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Base URL of the routing server, e.g. `http://localhost:5000`
    pub base_url: String,
    /// Routing profile segment of the URL (`driving`, `car`, ...)
    pub profile: String,
    /// Overall request timeout in seconds
    pub timeout_secs: u64,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Most coordinates (sources plus destinations) sent in one table request
    pub max_table_size: usize,
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::Config("routing.base_url must not be empty".to_string()));
        }
        if self.profile.trim().is_empty() {
            return Err(Error::Config("routing.profile must not be empty".to_string()));
        }
        if self.max_table_size < 2 {
            return Err(Error::Config(format!(
                "routing.max_table_size must be at least 2, got {}",
                self.max_table_size
            )));
        }
        Ok(())
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "driving".to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_table_size: DEFAULT_MAX_TABLE_SIZE,
        }
    }
}

/// Full configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub routing: RoutingConfig,
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject values that would make a run meaningless or never terminate
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.routing.validate()
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must be a positive number, got {value}")))
    }
}
