//! Configuration for the cell survival simulation

use std::time::Duration;
use std::{fs, io, path::Path, path::PathBuf};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// WORLD SETTINGS
// ============================================================================

/// Width of the playable map in world units
pub const MAP_WIDTH: f32 = 2000.0;

/// Height of the playable map in world units
pub const MAP_HEIGHT: f32 = 2000.0;

/// Logic ticks per second (the simulation always advances by 1 / LOGIC_HZ)
pub const LOGIC_HZ: f64 = 30.0;

/// Number of bot cells spawned at startup
pub const INITIAL_BOT_COUNT: usize = 20;

/// Bots are respawned whenever fewer than this many are alive
pub const MIN_POPULATION: usize = 10;

/// Number of natural DNA points kept on the map
pub const NATURAL_DNA_COUNT: usize = 1000;

/// Passive prey detection radius for the player (half of an 800px viewport)
pub const PLAYER_DETECTION_RADIUS: f32 = 400.0;

/// Minimum distance between a cell center and any map edge
pub const EDGE_CLEARANCE: f32 = 10.0;

/// Minimum distance between a DNA point and any map edge
pub const DNA_EDGE_CLEARANCE: f32 = 30.0;

// ============================================================================
// STARTING ATTRIBUTES
// ============================================================================

pub const STARTING_LIFE: f32 = 20.0;
pub const STARTING_DEFENSE: f32 = 20.0;
pub const STARTING_DAMAGE: f32 = 8.0;
pub const STARTING_SPEED: f32 = 200.0;
pub const STARTING_SIZE: f32 = 10.0;
pub const STARTING_STAMINA: f32 = 100.0;

/// Stamina regained per second while not running
pub const STAMINA_RECOVERY: f32 = 8.0;

/// Stamina spent per second by plain movement
pub const WALK_COST: f32 = 0.5;

/// Stamina spent per second while running
pub const RUN_COST: f32 = 15.0;

/// Milliseconds before a cell can attack again
pub const ATTACK_COOLDOWN_MS: f32 = 600.0;

/// Milliseconds of immunity after being the victim of a full attack
pub const FULL_DEFENSE_COOLDOWN_MS: f32 = 200.0;

/// Percent of base speed added while adrenaline is active
pub const ADRENALINE_SPEED_BUFF: f32 = 20.0;

/// Percent of base damage added while adrenaline is active
pub const ADRENALINE_DAMAGE_BUFF: f32 = 10.0;

/// Seconds adrenaline lasts
pub const ADRENALINE_TIME_SECS: f32 = 1.0;

/// Percent of base speed lost on every level up (while the toggle is on)
pub const REDUCE_SPEED_BY: f32 = 5.0;

/// Factor applied to every per-five-level cap
pub const MULTIPLIER_MAX_VALUE: f32 = 1.3;

/// Range of the first level threshold
pub const FIRST_LEVEL_RANGE: (i32, i32) = (100, 200);

// ============================================================================
// LEVELING
// ============================================================================

/// Next threshold = random value in this range × new level
pub const LEVEL_THRESHOLD_RANGE: (i32, i32) = (150, 300);

/// Fraction of size gained on every level up
pub const SIZE_GROWTH_PER_LEVEL: f32 = 0.01;

/// Fraction added to walk/run costs on every level up
pub const MOVEMENT_COST_GROWTH: f32 = 0.10;

/// Caps are scaled every this many levels
pub const CAP_SCALE_EVERY: u32 = 5;

/// Dead-drop DNA points spawned per level of a dying cell (plus one)
pub const DROPS_PER_LEVEL: u32 = 50;

/// Points credited to a killer per level of the victim
pub const KILL_BONUS_PER_LEVEL: f32 = 10.0;

/// Points lost on every regeneration tick
pub const POINT_DECAY: f32 = 0.5;

// ============================================================================
// DECISION LOOP
// ============================================================================

/// Randomized radius used to look for threats
pub const ESCAPE_RADIUS_RANGE: (f32, f32) = (150.0, 200.0);

/// Randomized radius used by bots to look for prey
pub const HUNT_RADIUS_RANGE: (f32, f32) = (300.0, 500.0);

/// Dead-drop DNA further than this is ignored by the priority forage step
pub const DEAD_DROP_SEARCH_RADIUS: f32 = 400.0;

/// Randomized lifetime of an escape/hunt commitment in milliseconds
pub const STATE_DURATION_MS: (f32, f32) = (500.0, 1000.0);

/// Lifetime of a random heading offset while escaping
pub const JITTER_INTERVAL_MS: f32 = 300.0;

/// Maximum heading offset (radians) while escaping
pub const JITTER_RANGE: f32 = 1.5;

/// Radians a bot may turn per tick
pub const TURN_RATE: f32 = 0.05;

/// Bots only hunt above this fraction of max life
pub const HUNT_LIFE_FRACTION: f32 = 0.5;

/// Bots only hunt above this fraction of max stamina
pub const HUNT_STAMINA_FRACTION: f32 = 0.1;

/// Equal-level cells need this many points per level more to count as stronger
pub const STRENGTH_MARGIN_PER_LEVEL: f32 = 50.0;

/// Interval of the hunt progress check
pub const HUNT_PATIENCE_INTERVAL_MS: f32 = 200.0;

/// Randomized time without progress before a hunt is abandoned
pub const HUNT_TOLERANCE_MS: (f32, f32) = (3000.0, 6000.0);

/// A hunt counts as progressing when the distance shrinks by more than this
pub const HUNT_PROGRESS_MIN: f32 = 10.0;

/// Randomized time before an abandoned prey may be hunted again
pub const FORGET_HUNT_MS: (f32, f32) = (3000.0, 6000.0);

/// Bots only start running above this fraction of max stamina
pub const BOT_RUN_STAMINA_FRACTION: f32 = 0.2;

/// Bots chasing prey closer than this run
pub const CHASE_RUN_DISTANCE: f32 = 250.0;

// ============================================================================
// COMBAT
// ============================================================================

/// Cells touch when their centers are closer than the radii sum minus this
pub const CONTACT_OVERLAP: f32 = 2.0;

/// Separation speed applied to both cells after a contact (units per second)
pub const CONTACT_IMPULSE: f32 = 1200.0;

/// Share of its damage the victim of a full attack deals back
pub const COUNTER_DAMAGE_FACTOR: f32 = 0.5;

/// Share of damage exchanged in a clash between even cells
pub const CLASH_DAMAGE_FACTOR: f32 = 1.0 / 3.0;

// ============================================================================
// EFFECTS
// ============================================================================

/// Fraction of base speed added while running
pub const RUN_SPEED_BONUS: f32 = 0.5;

/// Below this fraction of max stamina a cell is exhausted
pub const EXHAUSTED_FRACTION: f32 = 0.1;

/// Fraction of base speed removed while exhausted
pub const EXHAUSTED_SPEED_PENALTY: f32 = 0.3;

/// Fraction of life recovery added while adrenaline is active
pub const ADRENALINE_REGEN_BONUS: f32 = 0.5;

// ============================================================================
// DNA POINTS
// ============================================================================

pub const NATURAL_BOOSTER_RANGE: (i32, i32) = (1, 3);
pub const NATURAL_POINTS_RANGE: (i32, i32) = (1, 10);
pub const DEAD_DROP_BOOSTER: f32 = 2.0;
pub const DEAD_DROP_POINTS: f32 = 1.0;

/// Dead drops land within this distance of the dead cell
pub const DEAD_DROP_SCATTER: f32 = 20.0;

/// Milliseconds a fresh dead drop cannot be picked up
pub const DEAD_DROP_INVINCIBLE_MS: u64 = 400;

/// Pickup radius of a DNA point (added to the cell size)
pub const DNA_RADIUS: f32 = 10.0;

/// Life restored per harvested point
pub const HARVEST_LIFE_FACTOR: f32 = 0.1;

/// Stamina restored per harvested point
pub const HARVEST_STAMINA_FACTOR: f32 = 0.5;

// ============================================================================
// BACKGROUND TIMERS
// ============================================================================

pub const SPEED_SAMPLE_MS: f32 = 1000.0;
pub const REGENERATION_MS: f32 = 1000.0;

// ============================================================================
// UPGRADES
// ============================================================================

/// Cards offered on every level up
pub const CARDS_PER_OFFER: usize = 3;

/// Card deltas shrink by this fraction once the level-up slowdown is turned off
pub const UNTOGGLED_CARD_PENALTY: f32 = 0.05;

/// Runtime configuration, loadable from JSON. Missing fields fall back to the constants above.
#[derive(Resource, Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub map_width: f32,
    pub map_height: f32,
    pub logic_hz: f64,
    pub initial_bots: usize,
    pub min_population: usize,
    pub natural_dna: usize,
    pub spawn_player: bool,
    pub seed: Option<u64>,
    pub player_detection_radius: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            map_width: MAP_WIDTH,
            map_height: MAP_HEIGHT,
            logic_hz: LOGIC_HZ,
            initial_bots: INITIAL_BOT_COUNT,
            min_population: MIN_POPULATION,
            natural_dna: NATURAL_DNA_COUNT,
            spawn_player: true,
            seed: None,
            player_detection_radius: PLAYER_DETECTION_RADIUS,
        }
    }
}

impl SimConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.map_width < 100.0 || self.map_height < 100.0 {
            return Err(ConfigError::Invalid(format!(
                "map must be at least 100x100, got {}x{}",
                self.map_width, self.map_height
            )));
        }
        if self.logic_hz <= 0.0 {
            return Err(ConfigError::Invalid("logic_hz must be positive".into()));
        }
        if self.player_detection_radius <= 0.0 {
            return Err(ConfigError::Invalid(
                "player_detection_radius must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Length of one logic tick in seconds
    pub fn tick_secs(&self) -> f32 {
        (1.0 / self.logic_hz) as f32
    }

    /// Length of one logic tick, for bevy timers
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.logic_hz)
    }

    /// True when the point lies outside the world rectangle
    pub fn out_of_bounds(&self, x: f32, y: f32) -> bool {
        x < 1.0 || x > self.map_width || y < 1.0 || y > self.map_height
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse simulation config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read simulation config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid simulation config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = SimConfig::from_json_str(r#"{ "initial_bots": 3, "seed": 7 }"#).unwrap();
        assert_eq!(config.initial_bots, 3);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.map_width, MAP_WIDTH);
        assert_eq!(config.natural_dna, NATURAL_DNA_COUNT);
    }

    #[test]
    fn tiny_map_is_rejected() {
        let err = SimConfig::from_json_str(r#"{ "map_width": 10.0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn bounds_check_matches_world_rectangle() {
        let config = SimConfig::default();
        assert!(!config.out_of_bounds(1.0, 1.0));
        assert!(!config.out_of_bounds(MAP_WIDTH, MAP_HEIGHT));
        assert!(config.out_of_bounds(0.5, 100.0));
        assert!(config.out_of_bounds(100.0, MAP_HEIGHT + 0.1));
    }
}
