//! Session registry and the online training loop.
//!
//! Every session owns its own [`MasteryEnvironment`]. The estimator and replay
//! store are shared by all sessions with the same number of concepts, so
//! experience from one learner improves the policy for the next. Access is
//! serialized: the session mutex is held for an entire attempt, and the shared
//! learner is only ever locked while a session lock is held (or during
//! creation), which fixes the lock order as session -> learner.

use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    agent::{ActionMode, DQNAgent},
    config::TutorConfig,
    data::HistoricalDataset,
    environment::MasteryEnvironment,
    error::{Result, TutorError},
    experience::Transition,
    oracle::{CorrectnessOracle, Row},
    replay::ExperienceStore,
    state::MasteryState,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&SessionId> for SessionId {
    fn from(value: &SessionId) -> Self {
        value.clone()
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// What the session driver gets back after each attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub mastery: Vec<f64>,
    pub action: usize,
    pub reward: f64,
    pub correct: bool,
    pub done: bool,
    /// `None` once every concept is mastered.
    pub next_action: Option<usize>,
    /// Loss of the online update, absent when training was skipped.
    pub loss: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearnerSummary {
    pub stored: usize,
    pub capacity: usize,
    pub updates: usize,
}

fn absorb_training_error(session_id: &SessionId, result: Result<f32>) -> Option<f32> {
    match result {
        Ok(loss) => Some(loss),
        Err(err) if err.is_recoverable() => {
            debug!(session = %session_id, error = %err, "skipping online update");
            None
        }
        Err(err) => {
            warn!(session = %session_id, error = %err, "online update failed");
            None
        }
    }
}

/// Least-mastered concept, lowest index on ties.
fn least_mastered(mastery: &[f64]) -> usize {
    mastery
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(best, best_value), (i, &m)| {
            if m < best_value { (i, m) } else { (best, best_value) }
        })
        .0
}

fn next_action_or_fallback(session_id: &SessionId, chosen: Result<usize>, mastery: &[f64]) -> usize {
    chosen.unwrap_or_else(|err| {
        let fallback = least_mastered(mastery);
        warn!(session = %session_id, error = %err, fallback, "action selection failed");
        fallback
    })
}

struct Learner {
    agent: DQNAgent,
    store: ExperienceStore,
}

struct Session {
    environment: MasteryEnvironment,
    learner: Arc<Mutex<Learner>>,
    current_action: usize,
    attempts: usize,
}

pub struct TrainingOrchestrator {
    config: TutorConfig,
    history: Vec<Transition>,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
    learners: Mutex<HashMap<usize, Arc<Mutex<Learner>>>>,
}

impl TrainingOrchestrator {
    pub fn new(config: TutorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            history: Vec::new(),
            sessions: RwLock::new(HashMap::new()),
            learners: Mutex::new(HashMap::new()),
        })
    }

    /// Historical transitions used to pretrain each newly created learner.
    pub fn with_history(mut self, dataset: HistoricalDataset) -> Self {
        self.history = dataset.transitions;
        self
    }

    pub fn config(&self) -> &TutorConfig {
        &self.config
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn learner_for(&self, num_concepts: usize) -> Result<Arc<Mutex<Learner>>> {
        let mut learners = self.learners.lock();
        if let Some(learner) = learners.get(&num_concepts) {
            return Ok(Arc::clone(learner));
        }

        let mut agent = DQNAgent::new(num_concepts, self.config.agent.clone())?;
        let store = ExperienceStore::new(self.config.replay.capacity)?;

        if self.config.training.pretrain_on_init {
            let matching: Vec<Transition> = self
                .history
                .iter()
                .filter(|t| t.state.num_concepts() == num_concepts)
                .cloned()
                .collect();
            if matching.is_empty() {
                warn!(num_concepts, "no historical transitions to pretrain on");
            } else {
                info!(
                    transitions = matching.len(),
                    epochs = self.config.training.offline_epochs,
                    batch_size = self.config.training.offline_batch_size,
                    "starting offline training"
                );
                agent.offline_train(
                    &matching,
                    self.config.training.offline_epochs,
                    self.config.training.offline_batch_size,
                )?;
                info!("offline training complete");
            }
        }

        let learner = Arc::new(Mutex::new(Learner { agent, store }));
        learners.insert(num_concepts, Arc::clone(&learner));
        Ok(learner)
    }

    fn session(&self, session_id: &SessionId) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| TutorError::NotInitialized(session_id.clone()))
    }

    /// Creates (or replaces) a session and returns the first concept to quiz.
    pub fn init_session(&self, session_id: impl Into<SessionId>, num_concepts: usize) -> Result<usize> {
        let session_id = session_id.into();
        if num_concepts == 0 {
            return Err(TutorError::InvalidConfig(
                "a session needs at least one concept".to_string(),
            ));
        }

        let learner = self.learner_for(num_concepts)?;
        let mut environment = MasteryEnvironment::new(num_concepts, self.config.mastery.clone());
        environment.reset();

        let action = learner
            .lock()
            .agent
            .choose_action(&environment.state().mastery, ActionMode::Explore)?;

        let session = Session {
            environment,
            learner,
            current_action: action,
            attempts: 0,
        };
        let replaced = self
            .sessions
            .write()
            .insert(session_id.clone(), Arc::new(Mutex::new(session)))
            .is_some();

        info!(session = %session_id, num_concepts, action, replaced, "session initialised");
        Ok(action)
    }

    fn attempt(
        &self,
        session_id: &SessionId,
        session: &mut Session,
        action: usize,
        was_correct: bool,
    ) -> Result<AttemptOutcome> {
        session.environment.validate_action(action)?;
        if session.environment.is_done() {
            return Err(TutorError::EpisodeComplete(session_id.clone()));
        }

        let old_state = session.environment.state();
        let step = session.environment.step(action, was_correct)?;
        let transition = Transition::new(old_state, action, step.reward, step.next_state.clone());

        let mut learner = session.learner.lock();
        let Learner { agent, store } = &mut *learner;
        store.append(transition);

        // The step is committed from here on; later failures are logged, not returned.
        let batch_size = self.config.training.online_batch_size;
        let loss = absorb_training_error(session_id, agent.train_batch(store, batch_size));

        let next_action = if step.next_state.done {
            None
        } else {
            let chosen = agent.choose_action(&step.next_state.mastery, ActionMode::Explore);
            Some(next_action_or_fallback(session_id, chosen, &step.next_state.mastery))
        };
        drop(learner);

        session.current_action = next_action.unwrap_or(action);
        session.attempts += 1;

        info!(
            session = %session_id,
            attempt = session.attempts,
            action,
            correct = step.correct,
            reward = step.reward,
            done = step.next_state.done,
            "attempt processed"
        );

        Ok(AttemptOutcome {
            mastery: step.next_state.mastery,
            action,
            reward: step.reward,
            correct: step.correct,
            done: step.next_state.done,
            next_action,
            loss,
        })
    }

    /// Applies a graded attempt: step, store, train, pick the next concept.
    pub fn process_attempt(
        &self,
        session_id: &SessionId,
        action: usize,
        was_correct: bool,
    ) -> Result<AttemptOutcome> {
        let session = self.session(session_id)?;
        let mut session = session.lock();
        self.attempt(session_id, &mut session, action, was_correct)
    }

    /// Grades a submitted result set for the session's current concept and
    /// applies it. `expected_for` looks up the reference rows for a concept.
    pub fn submit_query_result<O, F>(
        &self,
        session_id: &SessionId,
        submitted: &[Row],
        expected_for: F,
        oracle: &O,
    ) -> Result<AttemptOutcome>
    where
        O: CorrectnessOracle + ?Sized,
        F: FnOnce(usize) -> Vec<Row>,
    {
        let session = self.session(session_id)?;
        let mut session = session.lock();
        let action = session.current_action;
        let expected = expected_for(action);
        let correct = oracle.compare(submitted, &expected);
        debug!(session = %session_id, action, correct, "graded submission");
        self.attempt(session_id, &mut session, action, correct)
    }

    pub fn current_action(&self, session_id: &SessionId) -> Result<usize> {
        Ok(self.session(session_id)?.lock().current_action)
    }

    pub fn state(&self, session_id: &SessionId) -> Result<MasteryState> {
        Ok(self.session(session_id)?.lock().environment.state())
    }

    /// Restarts a session from initial mastery and returns a fresh first concept.
    pub fn reset_session(&self, session_id: &SessionId) -> Result<usize> {
        let session = self.session(session_id)?;
        let mut session = session.lock();
        session.environment.reset();
        session.attempts = 0;
        let mastery = session.environment.state().mastery;
        let action = session
            .learner
            .lock()
            .agent
            .choose_action(&mastery, ActionMode::Explore)?;
        session.current_action = action;
        info!(session = %session_id, action, "session reset");
        Ok(action)
    }

    pub fn end_session(&self, session_id: &SessionId) -> bool {
        let removed = self.sessions.write().remove(session_id).is_some();
        if removed {
            info!(session = %session_id, "session ended");
        }
        removed
    }

    pub fn learner_summary(&self, num_concepts: usize) -> Option<LearnerSummary> {
        let learner = self.learners.lock().get(&num_concepts).cloned()?;
        let learner = learner.lock();
        Some(LearnerSummary {
            stored: learner.store.len(),
            capacity: learner.store.capacity(),
            updates: learner.agent.updates_done(),
        })
    }
}
