use tracing::debug;

use crate::{
    config::MasteryConfig,
    error::{Result, TutorError},
    state::{MasteryState, all_mastered},
};

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub next_state: MasteryState,
    pub reward: f64,
    pub correct: bool,
}

/// Mastery tracker for a single learner session.
///
/// Owns the only mutable copy of the session's state; everything handed out
/// is a snapshot.
#[derive(Debug, Clone)]
pub struct MasteryEnvironment {
    state: MasteryState,
    config: MasteryConfig,
}

impl MasteryEnvironment {
    pub fn new(num_concepts: usize, config: MasteryConfig) -> Self {
        Self {
            state: MasteryState::new(num_concepts, config.initial_mastery),
            config,
        }
    }

    /// Starts from explicit mastery values instead of the initial level.
    pub fn with_mastery(mastery: Vec<f64>, config: MasteryConfig) -> Self {
        Self {
            state: MasteryState::from_mastery(mastery, config.done_threshold),
            config,
        }
    }

    pub fn num_concepts(&self) -> usize {
        self.state.mastery.len()
    }

    pub fn is_done(&self) -> bool {
        self.state.done
    }

    pub fn config(&self) -> &MasteryConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        let initial = self.config.initial_mastery;
        self.state.mastery.iter_mut().for_each(|m| *m = initial);
        self.state.done = false;
    }

    pub fn state(&self) -> MasteryState {
        self.state.clone()
    }

    pub fn validate_action(&self, action: usize) -> Result<()> {
        if action >= self.num_concepts() {
            return Err(TutorError::InvalidAction {
                action,
                num_concepts: self.num_concepts(),
            });
        }
        Ok(())
    }

    /// Reward for practising a concept currently at `old` mastery.
    pub fn reward_for(&self, old: f64, was_correct: bool) -> f64 {
        let cfg = &self.config;
        let mut reward = 0.0;
        if cfg.learning_zone_low <= old && old <= cfg.learning_zone_high {
            reward += cfg.zone_bonus;
        } else if old >= cfg.mastered_penalty_threshold {
            reward -= cfg.mastered_penalty;
        }
        if was_correct {
            reward += cfg.correct_delta * cfg.correctness_bonus_scale;
        }
        reward
    }

    pub fn step(&mut self, action: usize, was_correct: bool) -> Result<StepOutcome> {
        self.validate_action(action)?;

        let old = self.state.mastery[action];
        let delta = if was_correct {
            self.config.correct_delta
        } else {
            self.config.incorrect_delta
        };
        self.state.mastery[action] = (old + delta).clamp(0.0, 1.0);

        let reward = self.reward_for(old, was_correct);

        if all_mastered(&self.state.mastery, self.config.done_threshold) {
            self.state.done = true;
        }

        debug!(
            action,
            was_correct,
            old,
            new = self.state.mastery[action],
            reward,
            done = self.state.done,
            "mastery step"
        );

        Ok(StepOutcome {
            next_state: self.state.clone(),
            reward,
            correct: was_correct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    fn env_with(first: f64, rest: f64, n: usize) -> MasteryEnvironment {
        let mut mastery = vec![rest; n];
        mastery[0] = first;
        MasteryEnvironment::with_mastery(mastery, MasteryConfig::default())
    }

    #[test]
    fn learning_zone_correct_answer() {
        let mut env = env_with(0.5, 0.6, 3);
        let out = env.step(0, true).unwrap();
        assert!((out.reward - 1.2).abs() < EPS);
        assert!((out.next_state.mastery[0] - 0.6).abs() < EPS);
        assert!(out.correct);
    }

    #[test]
    fn mastered_concept_wrong_answer_is_penalised() {
        let mut env = env_with(0.8, 0.6, 3);
        let out = env.step(0, false).unwrap();
        assert!((out.reward + 2.0).abs() < EPS);
        assert!((out.next_state.mastery[0] - 0.75).abs() < EPS);
        assert!(!out.correct);
    }

    #[test]
    fn low_mastery_gets_only_correctness_bonus() {
        let mut env = env_with(0.3, 0.6, 3);
        let out = env.step(0, true).unwrap();
        assert!((out.reward - 0.2).abs() < EPS);
        assert!((out.next_state.mastery[0] - 0.4).abs() < EPS);
    }

    #[test]
    fn correct_answer_clamps_at_full_mastery() {
        let mut env = env_with(0.95, 0.6, 4);
        let out = env.step(0, true).unwrap();
        assert_eq!(out.next_state.mastery[0], 1.0);
        assert!(!out.next_state.done);
        // 0.95 is past the penalty threshold.
        assert!((out.reward + 1.8).abs() < EPS);
    }

    #[test]
    fn mastering_last_concept_finishes_episode() {
        let mut env = env_with(0.75, 0.85, 4);
        assert!(!env.is_done());
        let out = env.step(0, true).unwrap();
        assert!((out.next_state.mastery[0] - 0.85).abs() < EPS);
        assert!(out.next_state.done);
        assert!(env.is_done());
        assert!((out.reward + 1.8).abs() < EPS);
    }

    #[test]
    fn non_finite_seed_values_are_floored() {
        let mut env = MasteryEnvironment::with_mastery(
            vec![f64::NAN, 0.6, f64::INFINITY],
            MasteryConfig::default(),
        );
        assert_eq!(env.state().mastery, vec![0.0, 0.6, 0.0]);
        let out = env.step(0, true).unwrap();
        assert!(out.next_state.mastery.iter().all(|m| (0.0..=1.0).contains(m)));
        assert!((out.next_state.mastery[0] - 0.1).abs() < EPS);
    }

    #[test]
    fn mastery_floors_at_zero() {
        let mut env = env_with(0.02, 0.6, 2);
        let out = env.step(0, false).unwrap();
        assert_eq!(out.next_state.mastery[0], 0.0);
        assert_eq!(out.reward, 0.0);
    }

    #[test]
    fn invalid_action_leaves_state_untouched() {
        let mut env = MasteryEnvironment::new(3, MasteryConfig::default());
        let before = env.state();
        let err = env.step(3, true).unwrap_err();
        assert!(matches!(
            err,
            TutorError::InvalidAction {
                action: 3,
                num_concepts: 3
            }
        ));
        assert_eq!(env.state(), before);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut env = env_with(0.95, 0.85, 4);
        env.step(0, true).unwrap();
        assert!(env.is_done());
        for _ in 0..3 {
            env.reset();
            let state = env.state();
            assert_eq!(state.mastery, vec![0.6; 4]);
            assert!(!state.done);
            assert_eq!(env.num_concepts(), 4);
        }
    }

    #[test]
    fn returned_state_is_a_copy() {
        let mut env = MasteryEnvironment::new(3, MasteryConfig::default());
        let mut snapshot = env.state();
        snapshot.mastery[1] = 0.0;
        snapshot.done = true;

        let out = env.step(1, true).unwrap();
        assert!((out.next_state.mastery[1] - 0.7).abs() < EPS);
        assert!(!out.next_state.done);

        let mut returned = out.next_state;
        returned.mastery[1] = 0.0;
        assert!((env.state().mastery[1] - 0.7).abs() < EPS);
    }

    #[test]
    fn thresholds_come_from_config() {
        let config = MasteryConfig {
            correct_delta: 0.2,
            zone_bonus: 5.0,
            ..MasteryConfig::default()
        };
        let mut env = MasteryEnvironment::with_mastery(vec![0.5, 0.5], config);
        let out = env.step(1, true).unwrap();
        assert!((out.reward - 5.4).abs() < EPS);
        assert!((out.next_state.mastery[1] - 0.7).abs() < EPS);
    }

    proptest! {
        #[test]
        fn mastery_stays_in_unit_interval(
            start in prop::collection::vec(0.0f64..=1.0, 1..8),
            moves in prop::collection::vec((0usize..8, any::<bool>()), 0..64),
        ) {
            let n = start.len();
            let mut env = MasteryEnvironment::with_mastery(start, MasteryConfig::default());
            for (action, correct) in moves {
                if env.is_done() {
                    break;
                }
                let out = env.step(action % n, correct).unwrap();
                prop_assert!(out.next_state.mastery.iter().all(|m| (0.0..=1.0).contains(m)));
                prop_assert_eq!(
                    out.next_state.done,
                    out.next_state.mastery.iter().all(|&m| m >= 0.8)
                );
            }
        }

        #[test]
        fn step_is_deterministic(
            old in 0.0f64..=1.0,
            correct in any::<bool>(),
        ) {
            let mut a = MasteryEnvironment::with_mastery(vec![old, 0.6], MasteryConfig::default());
            let mut b = a.clone();
            let out_a = a.step(0, correct).unwrap();
            let out_b = b.step(0, correct).unwrap();
            prop_assert_eq!(out_a.next_state.mastery[0], out_b.next_state.mastery[0]);
            prop_assert_eq!(out_a.reward, out_b.reward);
        }
    }
}
