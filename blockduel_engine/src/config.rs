// Data-driven engine configuration.
//
// Every timing and scoring constant the engine reads lives in `EngineConfig`,
// loadable from JSON. Both peers of a match must run identical configs: the
// flash length and score table decide when a board settles and what it
// reports, and a mismatch shows up as a desync.
//
// `from_json` applies serde defaults for missing fields, then `validate`
// checks the invariants the engine relies on (most importantly an even,
// non-zero flash toggle count, so a flash always ends in the same visibility
// state it started in).

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid engine config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("flash_toggles must be even and non-zero, got {0}")]
    FlashToggles(u32),
    #[error("{0} must be non-zero")]
    Zero(&'static str),
    #[error("line_scores needs at least 2 entries, got {0}")]
    LineScores(usize),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Time between visibility toggles while a clear set flashes.
    pub flash_interval_ms: u64,
    /// Toggles before the flash resolves. 4 = two full blink cycles.
    pub flash_toggles: u32,
    /// Gravity interval at level 1.
    pub gravity_base_ms: u64,
    /// Gravity speed-up per level above 1.
    pub gravity_step_ms: u64,
    /// Fastest gravity interval regardless of level.
    pub gravity_min_ms: u64,
    /// Points per clear, indexed by rows cleared at once, multiplied by the
    /// level. Clears larger than the table use the last entry.
    pub line_scores: Vec<u64>,
    pub lines_per_level: u32,
    /// Relative draw weights, indexed like `PieceKind::ALL`.
    pub piece_weights: [u32; 7],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flash_interval_ms: 100,
            flash_toggles: 4,
            gravity_base_ms: 1000,
            gravity_step_ms: 75,
            gravity_min_ms: 100,
            line_scores: vec![0, 100, 300, 500, 800],
            lines_per_level: 10,
            piece_weights: [1; 7],
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flash_toggles == 0 || self.flash_toggles % 2 != 0 {
            return Err(ConfigError::FlashToggles(self.flash_toggles));
        }
        if self.flash_interval_ms == 0 {
            return Err(ConfigError::Zero("flash_interval_ms"));
        }
        if self.gravity_min_ms == 0 {
            return Err(ConfigError::Zero("gravity_min_ms"));
        }
        if self.lines_per_level == 0 {
            return Err(ConfigError::Zero("lines_per_level"));
        }
        if self.piece_weights.iter().all(|&w| w == 0) {
            return Err(ConfigError::Zero("piece_weights"));
        }
        if self.line_scores.len() < 2 {
            return Err(ConfigError::LineScores(self.line_scores.len()));
        }
        Ok(())
    }

    /// Total time from lock to clear for a non-empty clear set.
    pub fn flash_duration_ms(&self) -> u64 {
        self.flash_interval_ms * u64::from(self.flash_toggles)
    }

    pub fn gravity_interval_ms(&self, level: u32) -> u64 {
        let speedup = self
            .gravity_step_ms
            .saturating_mul(u64::from(level.saturating_sub(1)));
        self.gravity_base_ms
            .saturating_sub(speedup)
            .max(self.gravity_min_ms)
    }

    /// Score for clearing `rows` rows at `level`.
    pub fn score_for(&self, rows: usize, level: u32) -> u64 {
        let index = rows.min(self.line_scores.len().saturating_sub(1));
        self.line_scores
            .get(index)
            .copied()
            .unwrap_or(0)
            .saturating_mul(u64::from(level))
    }

    pub fn level_for(&self, lines: u32) -> u32 {
        1 + lines / self.lines_per_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.flash_duration_ms(), 400);
    }

    #[test]
    fn default_config_serializes() {
        let config = EngineConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"flash_interval_ms": 50}"#).unwrap();
        assert_eq!(config.flash_interval_ms, 50);
        assert_eq!(config.flash_toggles, 4);
        assert_eq!(config.flash_duration_ms(), 200);
    }

    #[test]
    fn odd_toggle_count_is_rejected() {
        let err = EngineConfig::from_json(r#"{"flash_toggles": 3}"#).unwrap_err();
        assert!(matches!(err, ConfigError::FlashToggles(3)), "{err}");
        assert!(EngineConfig::from_json(r#"{"flash_toggles": 0}"#).is_err());
    }

    #[test]
    fn bad_json_is_a_parse_error() {
        let err = EngineConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn scoring_and_levels() {
        let config = EngineConfig::default();
        assert_eq!(config.score_for(1, 1), 100);
        assert_eq!(config.score_for(2, 3), 900);
        assert_eq!(config.score_for(7, 1), 800);
        assert_eq!(config.level_for(0), 1);
        assert_eq!(config.level_for(25), 3);
    }

    #[test]
    fn gravity_speeds_up_to_a_floor() {
        let config = EngineConfig::default();
        assert_eq!(config.gravity_interval_ms(1), 1000);
        assert_eq!(config.gravity_interval_ms(3), 850);
        assert_eq!(config.gravity_interval_ms(50), 100);
    }
}
