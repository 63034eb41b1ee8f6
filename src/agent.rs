use candle_core::{D, Tensor, backprop::GradStore};
use candle_nn::{Optimizer, VarMap, loss};
use rand::{Rng, rng, seq::SliceRandom};
use tracing::{debug, info};

use crate::{
    config::AgentConfig,
    device::DEVICE,
    error::{Result, TutorError},
    experience::Transition,
    mlp::MultiLayerPerceptron,
    replay::ExperienceStore,
};

/// Rescales all gradients so their global L2 norm is at most `max_norm`.
/// Returns the norm measured before clipping.
fn clip_gradients(
    grad_store: &mut GradStore,
    var_map: &VarMap,
    max_norm: f32,
) -> std::result::Result<f32, candle_core::Error> {
    let mut total_norm_sq: f32 = 0.0;
    let mut grads = vec![];

    for var in var_map.all_vars() {
        if let Some(grad) = grad_store.get(var.as_tensor()) {
            total_norm_sq += grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
            grads.push((var, grad.clone()));
        }
    }

    let total_norm = total_norm_sq.sqrt();
    if total_norm > max_norm {
        let scale = (max_norm / total_norm) as f64;
        for (var, grad) in grads {
            grad_store.insert(var.as_tensor(), grad.affine(scale, 0.0)?);
        }
    }

    Ok(total_norm)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionMode {
    /// ε-greedy over the current value estimates.
    Explore,
    /// Always the highest-valued concept; used for serving.
    Greedy,
}

/// Deep Q-network estimating, for each concept, the discounted return of
/// quizzing it next from a given mastery vector.
pub struct DQNAgent {
    policy_mlp: MultiLayerPerceptron,
    target_mlp: MultiLayerPerceptron,
    num_concepts: usize,
    config: AgentConfig,
    steps_done: usize,
    updates_done: usize,
}

impl DQNAgent {
    pub fn new(num_concepts: usize, config: AgentConfig) -> Result<Self> {
        if num_concepts == 0 {
            return Err(TutorError::InvalidConfig(
                "estimator needs at least one concept".to_string(),
            ));
        }
        let policy = MultiLayerPerceptron::new(
            &[num_concepts, config.hidden_units, num_concepts],
            config.learning_rate,
            config.weight_decay,
        )?;
        let target = policy.try_clone(config.learning_rate, config.weight_decay)?;
        Ok(Self {
            policy_mlp: policy,
            target_mlp: target,
            num_concepts,
            config,
            steps_done: 0,
            updates_done: 0,
        })
    }

    pub fn num_concepts(&self) -> usize {
        self.num_concepts
    }

    pub fn updates_done(&self) -> usize {
        self.updates_done
    }

    pub fn current_epsilon(&self) -> f32 {
        self.config.epsilon_end
            + (self.config.epsilon_start - self.config.epsilon_end)
                * (-1.0 * self.steps_done as f32 / self.config.epsilon_decay).exp()
    }

    fn check_width(&self, len: usize) -> Result<()> {
        if len != self.num_concepts {
            return Err(TutorError::DimensionMismatch {
                expected: self.num_concepts,
                actual: len,
            });
        }
        Ok(())
    }

    fn check_transition(&self, transition: &Transition) -> Result<()> {
        self.check_width(transition.state.num_concepts())?;
        self.check_width(transition.next_state.num_concepts())?;
        if transition.action >= self.num_concepts {
            return Err(TutorError::InvalidAction {
                action: transition.action,
                num_concepts: self.num_concepts,
            });
        }
        Ok(())
    }

    fn input_tensor(rows: &[&[f64]], width: usize) -> Result<Tensor> {
        let flat: Vec<f32> = rows
            .iter()
            .flat_map(|row| row.iter().map(|&m| m as f32))
            .collect();
        Ok(Tensor::from_vec(flat, (rows.len(), width), &DEVICE)?)
    }

    pub fn value_estimates(&self, mastery: &[f64]) -> Result<Vec<f32>> {
        self.check_width(mastery.len())?;
        let input = Self::input_tensor(&[mastery], self.num_concepts)?;
        let output = self.policy_mlp.output(&input)?;
        Ok(output.squeeze(0)?.to_vec1::<f32>()?)
    }

    pub fn choose_action(&mut self, mastery: &[f64], mode: ActionMode) -> Result<usize> {
        self.check_width(mastery.len())?;

        if mode == ActionMode::Explore {
            let epsilon = self.current_epsilon();
            self.steps_done += 1;
            let mut rng = rng();
            if rng.random::<f32>() < epsilon {
                let action = rng.random_range(0..self.num_concepts);
                debug!(action, epsilon, "exploratory action");
                return Ok(action);
            }
        }

        let values = self.value_estimates(mastery)?;
        let (best, _) = values
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |(best, best_value), (i, &v)| {
                if v > best_value { (i, v) } else { (best, best_value) }
            });
        Ok(best)
    }

    /// TD targets from the target network; terminal transitions keep only the reward.
    pub fn td_targets(&self, batch: &[&Transition]) -> Result<Vec<f32>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let next_rows: Vec<&[f64]> = batch.iter().map(|t| t.next_state.mastery.as_slice()).collect();
        let next_states = Self::input_tensor(&next_rows, self.num_concepts)?;
        let max_next_q = self
            .target_mlp
            .output(&next_states)?
            .max(D::Minus1)?
            .to_vec1::<f32>()?;

        let gamma = self.config.gamma as f32;
        Ok(batch
            .iter()
            .zip(max_next_q)
            .map(|(t, next_q)| {
                let reward = t.reward as f32;
                if t.is_terminal() { reward } else { reward + gamma * next_q }
            })
            .collect())
    }

    fn update(&mut self, batch: &[&Transition]) -> Result<f32> {
        for transition in batch {
            self.check_transition(transition)?;
        }
        let size = batch.len();

        let targets = self.td_targets(batch)?;
        let states: Vec<&[f64]> = batch.iter().map(|t| t.state.mastery.as_slice()).collect();
        let actions: Vec<u32> = batch.iter().map(|t| t.action as u32).collect();

        let state_tensor = Self::input_tensor(&states, self.num_concepts)?;
        let action_tensor = Tensor::from_vec(actions, (size, 1), &DEVICE)?;
        let target_tensor = Tensor::from_vec(targets, (size, 1), &DEVICE)?;

        let predicted_q_values = self.policy_mlp.output(&state_tensor)?;
        let relevant_q_values = predicted_q_values.gather(&action_tensor, D::Minus1)?;
        let loss = loss::mse(&relevant_q_values, &target_tensor)?;

        let mut grads = loss.backward()?;
        let grad_norm = clip_gradients(
            &mut grads,
            &self.policy_mlp.var_map,
            self.config.max_grad_norm,
        )?;
        self.policy_mlp.optimiser.step(&grads)?;

        self.updates_done += 1;
        if self.updates_done % self.config.target_sync_interval == 0 {
            self.sync_target()?;
        }

        let loss = loss.to_scalar::<f32>()?;
        debug!(size, loss, grad_norm, updates = self.updates_done, "q-network update");
        Ok(loss)
    }

    pub fn sync_target(&mut self) -> Result<()> {
        self.target_mlp.copy_weights_from(&self.policy_mlp)?;
        Ok(())
    }

    /// One gradient step on a uniform sample from `store`.
    ///
    /// Leaves the parameters untouched and returns `InsufficientData` when the
    /// store holds fewer than `batch_size` transitions.
    pub fn train_batch(&mut self, store: &ExperienceStore, batch_size: usize) -> Result<f32> {
        let batch = store.sample_batch(batch_size)?;
        if batch.is_empty() {
            return Ok(0.0);
        }
        self.update(&batch)
    }

    /// Warm-start over a historical dataset. Returns the mean loss of each epoch.
    pub fn offline_train(
        &mut self,
        transitions: &[Transition],
        epochs: usize,
        batch_size: usize,
    ) -> Result<Vec<f32>> {
        if transitions.is_empty() || epochs == 0 {
            return Ok(Vec::new());
        }
        let batch_size = batch_size.max(1);
        let mut order: Vec<usize> = (0..transitions.len()).collect();
        let mut rng = rng();
        let mut epoch_losses = Vec::with_capacity(epochs);

        for epoch in 0..epochs {
            order.shuffle(&mut rng);
            let mut total = 0.0;
            let mut batches = 0;
            for chunk in order.chunks(batch_size) {
                let batch: Vec<&Transition> = chunk.iter().map(|&i| &transitions[i]).collect();
                total += self.update(&batch)?;
                batches += 1;
            }
            let mean = total / batches as f32;
            info!(epoch = epoch + 1, epochs, mean_loss = mean, "offline epoch complete");
            epoch_losses.push(mean);
        }

        self.sync_target()?;
        Ok(epoch_losses)
    }

    pub fn parameter_snapshot(&self) -> Result<Vec<f32>> {
        Ok(self.policy_mlp.parameter_snapshot()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MasteryState;

    fn greedy_config() -> AgentConfig {
        AgentConfig {
            epsilon_start: 0.0,
            epsilon_end: 0.0,
            ..AgentConfig::default()
        }
    }

    fn transition(state: Vec<f64>, action: usize, reward: f64, next: Vec<f64>) -> Transition {
        Transition::new(
            MasteryState::from_mastery(state, 0.8),
            action,
            reward,
            MasteryState::from_mastery(next, 0.8),
        )
    }

    #[test]
    fn greedy_choice_is_argmax() {
        let mut agent = DQNAgent::new(4, greedy_config()).unwrap();
        let mastery = vec![0.6; 4];
        let values = agent.value_estimates(&mastery).unwrap();
        let action = agent.choose_action(&mastery, ActionMode::Explore).unwrap();
        assert!(action < 4);
        assert!(values.iter().all(|&v| v <= values[action]));
        assert_eq!(
            agent.choose_action(&mastery, ActionMode::Greedy).unwrap(),
            action
        );
    }

    #[test]
    fn full_exploration_covers_every_concept() {
        let config = AgentConfig {
            epsilon_start: 1.0,
            epsilon_end: 1.0,
            ..AgentConfig::default()
        };
        let mut agent = DQNAgent::new(3, config).unwrap();
        let mut seen = [false; 3];
        for _ in 0..300 {
            seen[agent.choose_action(&[0.6, 0.6, 0.6], ActionMode::Explore).unwrap()] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn epsilon_decays_towards_floor() {
        let mut agent = DQNAgent::new(2, AgentConfig::default()).unwrap();
        let start = agent.current_epsilon();
        for _ in 0..2000 {
            agent.choose_action(&[0.6, 0.6], ActionMode::Explore).unwrap();
        }
        let later = agent.current_epsilon();
        assert!(later < start);
        assert!(later >= AgentConfig::default().epsilon_end);
    }

    #[test]
    fn wrong_width_is_rejected() {
        let mut agent = DQNAgent::new(3, greedy_config()).unwrap();
        assert!(matches!(
            agent.choose_action(&[0.6, 0.6], ActionMode::Greedy),
            Err(TutorError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn terminal_targets_skip_bootstrap() {
        let agent = DQNAgent::new(2, greedy_config()).unwrap();
        let terminal = transition(vec![0.75, 0.8], 0, 0.2, vec![0.85, 0.8]);
        let ongoing = transition(vec![0.5, 0.6], 0, 1.2, vec![0.6, 0.6]);
        assert!(terminal.is_terminal());
        assert!(!ongoing.is_terminal());

        let targets = agent.td_targets(&[&terminal, &ongoing]).unwrap();
        assert_eq!(targets[0], 0.2);

        // Target and policy networks start identical.
        let next_values = agent.value_estimates(&[0.6, 0.6]).unwrap();
        let max_next = next_values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let expected = 1.2 + 0.9 * max_next;
        assert!((targets[1] - expected).abs() < 1e-4);
    }

    #[test]
    fn train_batch_without_data_leaves_parameters() {
        let mut agent = DQNAgent::new(3, greedy_config()).unwrap();
        let mut store = ExperienceStore::new(100).unwrap();
        store.append(transition(vec![0.6; 3], 1, 1.2, vec![0.6, 0.7, 0.6]));

        let before = agent.parameter_snapshot().unwrap();
        let err = agent.train_batch(&store, 16).unwrap_err();
        assert!(matches!(
            err,
            TutorError::InsufficientData {
                requested: 16,
                available: 1
            }
        ));
        assert_eq!(agent.parameter_snapshot().unwrap(), before);
        assert_eq!(agent.updates_done(), 0);
    }

    #[test]
    fn train_batch_updates_parameters() {
        let mut agent = DQNAgent::new(3, greedy_config()).unwrap();
        let mut store = ExperienceStore::new(100).unwrap();
        for _ in 0..4 {
            store.append(transition(vec![0.6; 3], 2, 1.2, vec![0.6, 0.6, 0.7]));
        }
        let before = agent.parameter_snapshot().unwrap();
        let loss = agent.train_batch(&store, 4).unwrap();
        assert!(loss.is_finite());
        assert_ne!(agent.parameter_snapshot().unwrap(), before);
        assert_eq!(agent.updates_done(), 1);
    }

    #[test]
    fn offline_train_on_empty_dataset_is_noop() {
        let mut agent = DQNAgent::new(3, greedy_config()).unwrap();
        let before = agent.parameter_snapshot().unwrap();
        assert!(agent.offline_train(&[], 10, 32).unwrap().is_empty());
        assert_eq!(agent.parameter_snapshot().unwrap(), before);
    }

    #[test]
    fn offline_train_fits_terminal_rewards() {
        let config = AgentConfig {
            learning_rate: 1e-2,
            weight_decay: 0.0,
            ..greedy_config()
        };
        let mut agent = DQNAgent::new(3, config).unwrap();
        let dataset: Vec<Transition> = (0..64)
            .map(|_| transition(vec![0.5, 0.5, 0.5], 1, 1.0, vec![0.9, 0.9, 0.9]))
            .collect();

        let losses = agent.offline_train(&dataset, 100, 16).unwrap();
        assert_eq!(losses.len(), 100);
        assert_eq!(agent.updates_done(), 400);
        assert!(losses[99] < losses[0]);

        let q = agent.value_estimates(&[0.5, 0.5, 0.5]).unwrap();
        assert!((q[1] - 1.0).abs() < 0.2, "q = {q:?}");
    }
}
