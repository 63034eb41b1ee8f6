use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

/// Reward shaping and mastery update constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasteryConfig {
    pub initial_mastery: f64,
    pub correct_delta: f64,
    pub incorrect_delta: f64,
    pub learning_zone_low: f64,
    pub learning_zone_high: f64,
    pub mastered_penalty_threshold: f64,
    pub done_threshold: f64,
    pub zone_bonus: f64,
    pub mastered_penalty: f64,
    pub correctness_bonus_scale: f64,
}

impl Default for MasteryConfig {
    fn default() -> Self {
        Self {
            initial_mastery: 0.6,
            correct_delta: 0.1,
            incorrect_delta: -0.05,
            learning_zone_low: 0.4,
            learning_zone_high: 0.6,
            mastered_penalty_threshold: 0.75,
            done_threshold: 0.8,
            zone_bonus: 1.0,
            mastered_penalty: 2.0,
            correctness_bonus_scale: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub capacity: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { capacity: 5000 }
    }
}

/// Q-network shape, optimiser and exploration schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub hidden_units: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub gamma: f64,
    pub epsilon_start: f32,
    pub epsilon_end: f32,
    pub epsilon_decay: f32,
    pub max_grad_norm: f32,
    pub target_sync_interval: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hidden_units: 64,
            learning_rate: 1e-3,
            weight_decay: 0.01,
            gamma: 0.9,
            epsilon_start: 0.3,
            epsilon_end: 0.05,
            epsilon_decay: 500.0,
            max_grad_norm: 1.0,
            target_sync_interval: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub online_batch_size: usize,
    pub offline_batch_size: usize,
    pub offline_epochs: usize,
    pub pretrain_on_init: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            online_batch_size: 16,
            offline_batch_size: 32,
            offline_epochs: 10,
            pretrain_on_init: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorConfig {
    pub num_concepts: usize,
    pub mastery: MasteryConfig,
    pub replay: ReplayConfig,
    pub agent: AgentConfig,
    pub training: TrainingConfig,
    pub log_level: String,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            num_concepts: 10,
            mastery: MasteryConfig::default(),
            replay: ReplayConfig::default(),
            agent: AgentConfig::default(),
            training: TrainingConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

fn env_override<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Some(value) = std::env::var(key).ok().and_then(|v| v.parse::<T>().ok()) {
        *target = value;
    }
}

impl TutorConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, optionally replaced by the JSON file named in `TUTOR_CONFIG`,
    /// then individual `TUTOR_*` overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("TUTOR_CONFIG") {
            Ok(path) => Self::from_json_file(path)?,
            Err(_) => Self::default(),
        };

        env_override("TUTOR_NUM_CONCEPTS", &mut config.num_concepts);
        env_override("TUTOR_REPLAY_CAPACITY", &mut config.replay.capacity);
        env_override("TUTOR_BATCH_SIZE", &mut config.training.online_batch_size);
        env_override(
            "TUTOR_OFFLINE_BATCH_SIZE",
            &mut config.training.offline_batch_size,
        );
        env_override("TUTOR_OFFLINE_EPOCHS", &mut config.training.offline_epochs);
        env_override("TUTOR_PRETRAIN", &mut config.training.pretrain_on_init);
        env_override("TUTOR_GAMMA", &mut config.agent.gamma);
        env_override("TUTOR_LEARNING_RATE", &mut config.agent.learning_rate);
        env_override("TUTOR_EPSILON_START", &mut config.agent.epsilon_start);
        env_override("TUTOR_EPSILON_END", &mut config.agent.epsilon_end);
        env_override("TUTOR_HIDDEN_UNITS", &mut config.agent.hidden_units);
        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(TutorError::InvalidConfig(msg.to_string()));

        if self.num_concepts == 0 {
            return invalid("num_concepts must be positive");
        }
        if self.replay.capacity == 0 {
            return invalid("replay capacity must be positive");
        }
        if self.training.online_batch_size == 0 || self.training.offline_batch_size == 0 {
            return invalid("batch sizes must be positive");
        }
        if self.training.online_batch_size > self.replay.capacity {
            return invalid("online batch size cannot exceed replay capacity");
        }
        if self.agent.learning_rate.is_nan() || self.agent.learning_rate <= 0.0 {
            return invalid("learning_rate must be positive");
        }
        if self.agent.max_grad_norm.is_nan() || self.agent.max_grad_norm <= 0.0 {
            return invalid("max_grad_norm must be positive");
        }
        if self.agent.hidden_units == 0 {
            return invalid("hidden_units must be positive");
        }
        if !(0.0..=1.0).contains(&self.agent.gamma) {
            return invalid("gamma must lie in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.agent.epsilon_start)
            || !(0.0..=1.0).contains(&self.agent.epsilon_end)
        {
            return invalid("epsilon must lie in [0, 1]");
        }
        if self.agent.epsilon_decay <= 0.0 {
            return invalid("epsilon_decay must be positive");
        }
        if self.agent.target_sync_interval == 0 {
            return invalid("target_sync_interval must be positive");
        }

        let m = &self.mastery;
        let unit = 0.0..=1.0;
        for (name, value) in [
            ("initial_mastery", m.initial_mastery),
            ("learning_zone_low", m.learning_zone_low),
            ("learning_zone_high", m.learning_zone_high),
            ("mastered_penalty_threshold", m.mastered_penalty_threshold),
            ("done_threshold", m.done_threshold),
        ] {
            if !unit.contains(&value) {
                return Err(TutorError::InvalidConfig(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
        }
        if m.learning_zone_low > m.learning_zone_high {
            return invalid("learning zone bounds are inverted");
        }
        if m.initial_mastery >= m.done_threshold {
            return invalid("initial_mastery must be below done_threshold");
        }
        Ok(())
    }
}
