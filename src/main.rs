use std::{error::Error, time::Instant};

use tracing::{info, warn};

use mastery_tutor::{
    config::TutorConfig,
    data::{HistoricalDataset, load_transitions_from_csv},
    logging,
    session::{SessionId, TrainingOrchestrator},
    simulation::{RunLog, SimulatedLearner, run_session},
};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn main() -> Result<(), Box<dyn Error>> {
    let config = TutorConfig::from_env()?;
    logging::init_tracing(&config.log_level);

    let history = match std::env::var("TUTOR_HISTORY_PATH") {
        Ok(path) => {
            let start = Instant::now();
            let dataset = load_transitions_from_csv(&path, config.mastery.done_threshold)?;
            info!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                "parsed historical data"
            );
            if dataset.num_concepts != config.num_concepts {
                warn!(
                    dataset = dataset.num_concepts,
                    configured = config.num_concepts,
                    "historical data has a different concept count and will not be used"
                );
            }
            dataset
        }
        Err(_) => HistoricalDataset::default(),
    };

    let sessions: usize = env_or("TUTOR_SIM_SESSIONS", 5);
    let max_steps: usize = env_or("TUTOR_SIM_MAX_STEPS", 200);
    let seed: u64 = env_or("TUTOR_SIM_SEED", 42);
    let num_concepts = config.num_concepts;

    let orchestrator = TrainingOrchestrator::new(config)?.with_history(history);
    let mut log = RunLog::default();
    let mut mastered = 0;

    for i in 0..sessions {
        let session_id = SessionId::from(format!("sim-{i}"));
        let mut learner = SimulatedLearner::new(num_concepts, seed.wrapping_add(i as u64));
        let report = run_session(
            &orchestrator,
            &session_id,
            num_concepts,
            &mut learner,
            max_steps,
            &mut log,
        )?;
        if report.done {
            mastered += 1;
        }
        orchestrator.end_session(&session_id);
    }

    if let Some(summary) = orchestrator.learner_summary(num_concepts) {
        info!(
            sessions,
            mastered,
            stored = summary.stored,
            capacity = summary.capacity,
            updates = summary.updates,
            "simulation complete"
        );
    }

    if let Ok(path) = std::env::var("TUTOR_RUN_LOG") {
        log.write_csv(path)?;
    }
    Ok(())
}
