use serde::{Deserialize, Serialize};

/// A learner's per-concept proficiency, every entry in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasteryState {
    pub mastery: Vec<f64>,
    pub done: bool,
}

impl MasteryState {
    pub fn new(num_concepts: usize, initial_mastery: f64) -> Self {
        Self {
            mastery: vec![initial_mastery; num_concepts],
            done: false,
        }
    }

    /// Builds a state from raw values, clamping into range and deriving `done`.
    /// Non-finite values count as no mastery.
    pub fn from_mastery(mastery: Vec<f64>, done_threshold: f64) -> Self {
        let mastery: Vec<f64> = mastery
            .into_iter()
            .map(|m| if m.is_finite() { m.clamp(0.0, 1.0) } else { 0.0 })
            .collect();
        let done = all_mastered(&mastery, done_threshold);
        Self { mastery, done }
    }

    pub fn num_concepts(&self) -> usize {
        self.mastery.len()
    }

    pub fn mean_mastery(&self) -> f64 {
        if self.mastery.is_empty() {
            return 0.0;
        }
        self.mastery.iter().sum::<f64>() / self.mastery.len() as f64
    }
}

pub fn all_mastered(mastery: &[f64], done_threshold: f64) -> bool {
    !mastery.is_empty() && mastery.iter().all(|&m| m >= done_threshold)
}
