//! Adaptive SQL tutoring core: a mastery environment, a replay store and a
//! DQN that decides which concept a learner should practise next.

pub mod agent;
pub mod config;
pub mod data;
pub mod device;
pub mod environment;
pub mod error;
pub mod experience;
pub mod logging;
pub mod mlp;
pub mod oracle;
pub mod replay;
pub mod session;
pub mod simulation;
pub mod state;

pub use agent::{ActionMode, DQNAgent};
pub use config::TutorConfig;
pub use environment::{MasteryEnvironment, StepOutcome};
pub use error::{Result, TutorError};
pub use experience::Transition;
pub use replay::ExperienceStore;
pub use session::{AttemptOutcome, SessionId, TrainingOrchestrator};
pub use state::MasteryState;
