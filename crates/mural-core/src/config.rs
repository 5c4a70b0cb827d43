//! Fleet configuration
//!
//! Loaded once from TOML at startup. Every field has a default, so an
//! empty file is a valid reference-deployment configuration.
//!
//! ```toml
//! tick_interval_ms = 1000
//! base_cooldown_ms = 300000
//! jitter_max_ms = 60000
//! write_timeout_ms = 10000
//! queue_capacity = 0
//! verify_placement = false
//! roster_path = "data/users.json"
//!
//! [target_origin]
//! x = -358
//! y = 300
//! ```

use crate::error::ConfigError;
use mural_canvas::{Point, Tile, TileLayout};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Dispatcher and canvas configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FleetConfig {
    /// Scheduler tick period
    pub tick_interval_ms: u64,
    /// Cooldown after a successful write
    pub base_cooldown_ms: u64,
    /// Exclusive upper bound of the random jitter added to every cooldown
    pub jitter_max_ms: u64,
    /// Bound on a single outbound write
    pub write_timeout_ms: u64,
    /// Pending-queue capacity per agent (0 = growable)
    pub queue_capacity: usize,
    /// Query placement history after a successful write (log only)
    pub verify_placement: bool,
    /// Delay before re-subscribing a dropped tile feed
    pub feed_retry_ms: u64,
    /// Global position of the target image's top-left pixel
    pub target_origin: Point,
    /// Shift from global space to canvas space
    pub canvas_origin: Point,
    /// Tile table
    pub tiles: Vec<Tile>,
    /// Persisted roster location
    pub roster_path: PathBuf,
}

impl FleetConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string and validate
    ///
    /// # Errors
    /// TOML syntax errors or failed validation
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: FleetConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate
    ///
    /// # Errors
    /// I/O, parse or validation errors
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::from_toml_str(&content)
    }

    /// Reject configurations the dispatcher cannot run with
    ///
    /// # Errors
    /// `ConfigError::Invalid` or a malformed tile layout
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be > 0".into()));
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid("write_timeout_ms must be > 0".into()));
        }
        self.tile_layout()?;
        if self.target_origin.checked_add(self.canvas_origin).is_none() {
            return Err(ConfigError::Invalid(format!(
                "target_origin {} leaves the coordinate range",
                self.target_origin
            )));
        }
        Ok(())
    }

    /// Validated tile layout
    ///
    /// # Errors
    /// `ConfigError::Canvas` if the tile table is malformed
    pub fn tile_layout(&self) -> Result<TileLayout, ConfigError> {
        Ok(TileLayout::new(self.tiles.clone(), self.canvas_origin)?)
    }

    /// With tick interval
    #[inline]
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = duration_ms(interval);
        self
    }

    /// With base cooldown
    #[inline]
    #[must_use]
    pub fn with_base_cooldown(mut self, cooldown: Duration) -> Self {
        self.base_cooldown_ms = duration_ms(cooldown);
        self
    }

    /// With jitter bound
    #[inline]
    #[must_use]
    pub fn with_jitter_max(mut self, jitter: Duration) -> Self {
        self.jitter_max_ms = duration_ms(jitter);
        self
    }

    /// With write timeout
    #[inline]
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout_ms = duration_ms(timeout);
        self
    }

    /// With per-agent queue capacity
    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// With target origin
    #[inline]
    #[must_use]
    pub fn with_target_origin(mut self, origin: Point) -> Self {
        self.target_origin = origin;
        self
    }

    /// With a custom tile table
    #[inline]
    #[must_use]
    pub fn with_tiles(mut self, tiles: Vec<Tile>, canvas_origin: Point) -> Self {
        self.tiles = tiles;
        self.canvas_origin = canvas_origin;
        self
    }

    /// With placement verification
    #[inline]
    #[must_use]
    pub fn with_verify_placement(mut self, verify: bool) -> Self {
        self.verify_placement = verify;
        self
    }

    /// Scheduler tick period
    #[inline]
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Write timeout
    #[inline]
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Feed re-subscribe delay
    #[inline]
    #[must_use]
    pub fn feed_retry(&self) -> Duration {
        Duration::from_millis(self.feed_retry_ms)
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        let reference = TileLayout::reference();
        Self {
            tick_interval_ms: 1_000,
            base_cooldown_ms: 5 * 60 * 1_000,
            jitter_max_ms: 60 * 1_000,
            write_timeout_ms: 10_000,
            queue_capacity: 0,
            verify_placement: false,
            feed_retry_ms: 5_000,
            target_origin: Point::default(),
            canvas_origin: reference.canvas_origin(),
            tiles: reference.tiles().to_vec(),
            roster_path: PathBuf::from("data/users.json"),
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mural_canvas::CanvasError;

    #[test]
    fn config_defaults_match_reference_deployment() {
        let config = FleetConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.base_cooldown_ms, 300_000);
        assert_eq!(config.tiles.len(), 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_empty_toml_is_default() {
        let config = FleetConfig::from_toml_str("").unwrap();
        assert_eq!(config, FleetConfig::default());
    }

    #[test]
    fn config_parse_overrides() {
        let toml = r#"
tick_interval_ms = 250
queue_capacity = 16
verify_placement = true

[target_origin]
x = -358
y = 300
"#;
        let config = FleetConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.queue_capacity, 16);
        assert!(config.verify_placement);
        assert_eq!(config.target_origin, Point::new(-358, 300));
    }

    #[test]
    fn config_parse_custom_tiles() {
        let toml = r#"
canvas_origin = { x = 0, y = 0 }

[[tiles]]
id = 0
offset_x = 0
offset_y = 0
width = 32
height = 32

[[tiles]]
id = 1
offset_x = 32
offset_y = 0
width = 32
height = 32
"#;
        let config = FleetConfig::from_toml_str(toml).unwrap();
        let layout = config.tile_layout().unwrap();
        assert_eq!(layout.len(), 2);
        assert_eq!(layout.map_to_tile(Point::new(40, 1)).unwrap(), (1, Point::new(8, 1)));
    }

    #[test]
    fn config_rejects_zero_tick() {
        let result = FleetConfig::from_toml_str("tick_interval_ms = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn config_rejects_overlapping_tiles() {
        let config = FleetConfig::new().with_tiles(
            vec![Tile::new(0, 0, 0, 10, 10), Tile::new(1, 0, 0, 10, 10)],
            Point::default(),
        );
        assert!(matches!(config.validate(), Err(ConfigError::Canvas(_))));
    }

    #[test]
    fn config_rejects_origins_at_coordinate_limit() {
        let result = FleetConfig::from_toml_str("[target_origin]\nx = 2147483647\ny = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let toml = r#"
canvas_origin = { x = -2147483648, y = 0 }
tiles = [{ id = 0, offset_x = 10, offset_y = 0, width = 10, height = 10 }]
"#;
        let result = FleetConfig::from_toml_str(toml);
        assert!(matches!(
            result,
            Err(ConfigError::Canvas(CanvasError::CoordinateOverflow(_)))
        ));
    }

    #[test]
    fn config_rejects_unknown_keys() {
        assert!(FleetConfig::from_toml_str("tick_interval = 5").is_err());
    }

    #[test]
    fn config_builders() {
        let config = FleetConfig::new()
            .with_tick_interval(Duration::from_millis(50))
            .with_write_timeout(Duration::from_secs(2))
            .with_queue_capacity(4);
        assert_eq!(config.tick_interval_ms, 50);
        assert_eq!(config.write_timeout_ms, 2_000);
        assert_eq!(config.queue_capacity, 4);
    }
}
