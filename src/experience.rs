use serde::{Deserialize, Serialize};

use crate::state::MasteryState;

/// One observed `(state, action, reward, next_state)` record.
///
/// Both states are owned snapshots, so later environment updates never reach
/// back into stored history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: MasteryState,
    pub action: usize,
    pub reward: f64,
    pub next_state: MasteryState,
}

impl Transition {
    pub fn new(state: MasteryState, action: usize, reward: f64, next_state: MasteryState) -> Self {
        Self {
            state,
            action,
            reward,
            next_state,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next_state.done
    }
}
