use std::{fs::File, path::Path};

use polars::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::info;

use crate::{
    error::Result,
    session::{SessionId, TrainingOrchestrator},
};

/// A stand-in learner with a hidden per-concept chance of answering correctly
/// that grows each time the concept is practised.
pub struct SimulatedLearner {
    aptitude: Vec<f64>,
    practice_gain: f64,
    rng: StdRng,
}

impl SimulatedLearner {
    pub fn new(num_concepts: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let aptitude = (0..num_concepts)
            .map(|_| rng.random_range(0.2..0.9))
            .collect();
        Self {
            aptitude,
            practice_gain: 0.05,
            rng,
        }
    }

    pub fn aptitude(&self) -> &[f64] {
        &self.aptitude
    }

    pub fn answer(&mut self, concept: usize) -> bool {
        let p = self.aptitude[concept];
        let correct = self.rng.random_bool(p);
        self.aptitude[concept] = (p + self.practice_gain).min(0.95);
        correct
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunLog {
    session: Vec<String>,
    step: Vec<u32>,
    action: Vec<u32>,
    correct: Vec<bool>,
    reward: Vec<f64>,
    mean_mastery: Vec<f64>,
}

impl RunLog {
    pub fn len(&self) -> usize {
        self.step.len()
    }

    pub fn is_empty(&self) -> bool {
        self.step.is_empty()
    }

    pub fn to_frame(&self) -> Result<DataFrame> {
        Ok(DataFrame::new(vec![
            Column::new("session".into(), self.session.clone()),
            Column::new("step".into(), self.step.clone()),
            Column::new("action".into(), self.action.clone()),
            Column::new("correct".into(), self.correct.clone()),
            Column::new("reward".into(), self.reward.clone()),
            Column::new("mean_mastery".into(), self.mean_mastery.clone()),
        ])?)
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut frame = self.to_frame()?;
        let mut file = File::create(path.as_ref())?;
        CsvWriter::new(&mut file).finish(&mut frame)?;
        info!(path = %path.as_ref().display(), rows = self.len(), "run log written");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub steps: usize,
    pub correct: usize,
    pub total_reward: f64,
    pub final_mean_mastery: f64,
    pub done: bool,
}

/// Drives one session until mastery or `max_steps` attempts.
pub fn run_session(
    orchestrator: &TrainingOrchestrator,
    session_id: &SessionId,
    num_concepts: usize,
    learner: &mut SimulatedLearner,
    max_steps: usize,
    log: &mut RunLog,
) -> Result<SessionReport> {
    let mut action = orchestrator.init_session(session_id, num_concepts)?;
    let mut report = SessionReport {
        steps: 0,
        correct: 0,
        total_reward: 0.0,
        final_mean_mastery: orchestrator.state(session_id)?.mean_mastery(),
        done: false,
    };

    for step in 0..max_steps {
        let was_correct = learner.answer(action);
        let outcome = orchestrator.process_attempt(session_id, action, was_correct)?;
        let mean = outcome.mastery.iter().sum::<f64>() / outcome.mastery.len() as f64;

        log.session.push(session_id.to_string());
        log.step.push(step as u32);
        log.action.push(action as u32);
        log.correct.push(outcome.correct);
        log.reward.push(outcome.reward);
        log.mean_mastery.push(mean);

        report.steps += 1;
        report.correct += usize::from(outcome.correct);
        report.total_reward += outcome.reward;
        report.final_mean_mastery = mean;
        report.done = outcome.done;

        match outcome.next_action {
            Some(next) => action = next,
            None => break,
        }
    }

    info!(
        session = %session_id,
        steps = report.steps,
        correct = report.correct,
        total_reward = report.total_reward,
        mean_mastery = report.final_mean_mastery,
        done = report.done,
        "session finished"
    );
    Ok(report)
}
